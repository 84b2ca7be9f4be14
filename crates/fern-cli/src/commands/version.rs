use miette::Result;

/// The current version, read from Cargo.toml at compile time.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub fn run(json: bool) -> Result<()> {
    if json {
        println!(
            "{}",
            serde_json::json!({ "ok": true, "name": "fern", "version": VERSION })
        );
    } else {
        println!("fern {VERSION}");
    }
    Ok(())
}
