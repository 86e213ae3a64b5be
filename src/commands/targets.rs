/// `confgraph targets` command implementation
///
/// Prints the canonical identifier of every registered target, which is the
/// form exclusion lists expect.
use anyhow::Result;

use confgraph::builtins;

pub fn run() -> Result<()> {
    let registry = builtins::registry()?;

    println!("Registered targets ({}):", registry.len());
    println!();
    for spec in registry.specs() {
        if spec.is_deterministic() {
            println!("  {}", spec.id());
        } else {
            println!("  {}  (non-deterministic, never persisted)", spec.id());
        }
    }

    Ok(())
}
