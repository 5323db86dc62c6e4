use crate::out;
use crate::Cli;

pub fn run(cli: &Cli) {
    let name = env!("CARGO_PKG_NAME");
    let version = env!("CARGO_PKG_VERSION");
    let layer = grammers_tl_types::LAYER;
    if cli.output.is_json() {
        let _ = out::write_json(&serde_json::json!({
            "name": name,
            "version": version,
            "schema_layer": layer,
        }));
    } else if !cli.output.is_none() {
        println!("{} {} (API layer {})", name, version, layer);
    }
}
