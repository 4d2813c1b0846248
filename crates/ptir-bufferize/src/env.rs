use std::env;
use std::sync::OnceLock;

static IDENTITY_LAYOUT: OnceLock<bool> = OnceLock::new();
static VERIFY: OnceLock<bool> = OnceLock::new();
static FOLD_BRIDGES: OnceLock<bool> = OnceLock::new();

fn parse_bool(value: &str) -> bool {
    let normalized = value.trim().to_ascii_lowercase();
    matches!(normalized.as_str(), "1" | "true" | "yes" | "on")
}

fn read_flag(cell: &OnceLock<bool>, name: &str) -> bool {
    *cell.get_or_init(|| match env::var(name) {
        Ok(value) if !value.trim().is_empty() => parse_bool(&value),
        _ => false,
    })
}

/// `PTIR_BUFFERIZE_IDENTITY_LAYOUT`: force identity-layout copies for every broadcast.
pub(crate) fn identity_layout_forced() -> bool {
    read_flag(&IDENTITY_LAYOUT, "PTIR_BUFFERIZE_IDENTITY_LAYOUT")
}

/// `PTIR_BUFFERIZE_VERIFY`: run the legality check after bufferization.
pub(crate) fn verify_enabled() -> bool {
    read_flag(&VERIFY, "PTIR_BUFFERIZE_VERIFY")
}

/// `PTIR_BUFFERIZE_FOLD_BRIDGES`: fold tensor/buffer bridge pairs after bufferization.
pub(crate) fn fold_bridges_enabled() -> bool {
    read_flag(&FOLD_BRIDGES, "PTIR_BUFFERIZE_FOLD_BRIDGES")
}
