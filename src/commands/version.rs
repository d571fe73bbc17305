//! `quadsyncd version` — print build metadata.

pub fn run() {
    println!("quadsyncd {}", env!("CARGO_PKG_VERSION"));
}
