use action_sdk::ActionParameters;
use agent_common::constants::variables::PARAM_PREFIX;
use agent_common::ConfigSnapshot;

/// Collect the invocation parameters from the configuration surface.
///
/// Every `CA_PARAM_<NAME>` entry becomes parameter `<NAME>` with the value
/// unchanged. The bare prefix names no parameter and is ignored.
pub fn collect_parameters(snapshot: &ConfigSnapshot) -> ActionParameters {
    snapshot
        .iter()
        .filter_map(|(key, value)| {
            key.strip_prefix(PARAM_PREFIX)
                .filter(|name| !name.is_empty())
                .map(|name| (name.to_string(), value.clone()))
        })
        .collect()
}
