use serde_json::Map;
use serde_json::Value;

/// An open string-to-value mapping used for plugin and pass metadata on
/// assets and dependencies.
pub type JSONObject = Map<String, Value>;

/// Meta key carrying the wrap flag between passes and downstream packagers.
pub const META_SHOULD_WRAP: &str = "shouldWrap";
