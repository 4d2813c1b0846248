use crate::spec::{Function, Instruction, Program};

/// Read-only traversal hooks over a program, called in program order.
pub trait ProgramVisitor {
    fn on_program(&mut self, _program: &Program) {}
    fn on_function(&mut self, _function: &Function) {}
    fn on_instruction(&mut self, _function: &Function, _index: usize, _inst: &Instruction) {}
    fn on_function_end(&mut self, _function: &Function) {}
}

pub fn walk_program<V: ProgramVisitor + ?Sized>(program: &Program, visitor: &mut V) {
    visitor.on_program(program);
    for function in &program.functions {
        walk_function(function, visitor);
    }
}

pub fn walk_function<V: ProgramVisitor + ?Sized>(function: &Function, visitor: &mut V) {
    visitor.on_function(function);
    for (idx, inst) in function.body.iter().enumerate() {
        visitor.on_instruction(function, idx, inst);
    }
    visitor.on_function_end(function);
}
