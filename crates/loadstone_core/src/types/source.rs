use std::path::PathBuf;

use serde::Deserialize;
use serde::Serialize;

/// A location within a source file, used to point diagnostics back at the
/// import or config entry that produced a dependency or target.
#[derive(Clone, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceLocation {
  pub file_path: PathBuf,
  pub start: Location,
  pub end: Location,
}

#[derive(Clone, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
pub struct Location {
  pub line: u32,
  pub column: u32,
}
