use nodegate_dispatch::GateConfig;
use serde::Serialize;
use std::path::Path;

pub fn resolve_config_or_exit(config_arg: Option<&str>) -> GateConfig {
    GateConfig::resolve(config_arg.map(Path::new), |var| std::env::var(var).ok()).unwrap_or_else(
        |e| {
            eprintln!("error: {e}");
            std::process::exit(1);
        },
    )
}

pub fn config_source(config_arg: Option<&str>) -> String {
    config_arg.map_or_else(|| "defaults".to_string(), str::to_string)
}

pub fn print_json<T: Serialize>(payload: &T) {
    match serde_json::to_string_pretty(payload) {
        Ok(text) => println!("{text}"),
        Err(e) => {
            eprintln!("error: failed to render json: {e}");
            std::process::exit(1);
        }
    }
}

pub fn print_list_block(label: &str, items: &[String]) {
    if items.is_empty() {
        println!("  {label}: none");
        return;
    }
    println!("  {label}:");
    for item in items {
        println!("    - {item}");
    }
}
