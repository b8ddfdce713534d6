// Adds parameters A and B. The build stamps a version taken from
// SUM_ACTION_VERSION so successive builds are distinguishable.

use action_sdk::ActionParameters;
use serde_json::{json, Value};

const VERSION: &str = match option_env!("SUM_ACTION_VERSION") {
    Some(version) => version,
    None => "0",
};

fn operand(params: &ActionParameters, name: &str) -> Result<i64, String> {
    params
        .get(name)
        .ok_or_else(|| format!("missing {name}"))?
        .parse()
        .map_err(|e| format!("{name}: {e}"))
}

fn sum(params: ActionParameters) -> Result<Value, String> {
    let version: u64 = VERSION.parse().map_err(|e| format!("version: {e}"))?;
    Ok(json!({
        "sum": operand(&params, "A")? + operand(&params, "B")?,
        "version": version,
    }))
}

action_sdk::export_action!(sum);
