//! CLI subcommand implementations: the `sync` / `serve` / `version`
//! contract from spec §6. Argument parsing and dispatch live in `main.rs`;
//! each module here owns one subcommand's behavior.

pub mod serve;
pub mod sync;
pub mod version;
