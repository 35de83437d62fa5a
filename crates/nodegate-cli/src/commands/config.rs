use crate::support::{config_source, print_json, resolve_config_or_exit};
use serde_json::json;

pub fn run(config: Option<String>, json_output: bool) {
    let resolved = resolve_config_or_exit(config.as_deref());
    let source = config_source(config.as_deref());

    if json_output {
        print_json(&json!({
            "source": source,
            "config": resolved,
        }));
    } else {
        println!("nodegate config");
        println!("  Source: {source}");
        println!("  max_slots: {}", resolved.max_slots);
        println!("  slot_timeout_ms: {}", resolved.slot_timeout_ms);
        println!("  stale_window_ms: {}", resolved.stale_window_ms);
        println!("  read_wait_budget_ms: {}", resolved.read_wait_budget_ms);
        println!("  sweep_interval_ms: {}", resolved.sweep_interval_ms);
    }
}
