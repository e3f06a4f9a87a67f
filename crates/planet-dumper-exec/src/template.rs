//! Artifact name templates.

use chrono::{DateTime, SecondsFormat, Utc};
use planet_dumper_common::SequenceNumber;
use std::path::Path;

/// Extension of the primary (database-native) dump artifact.
pub const PRIMARY_EXTENSION: &str = "dmp";

/// Render the output name for a run.
///
/// - `{state}` and `{sequenceNumber}` - the resolved sequence number
/// - `{timestamp}` - the run timestamp, UTC ISO-8601 with milliseconds
///
/// Unknown placeholders are left as is.
///
/// ```
/// use chrono::{TimeZone, Utc};
/// use planet_dumper_common::SequenceNumber;
/// use planet_dumper_exec::render_name;
///
/// let timestamp = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
/// let state = SequenceNumber::new(42);
///
/// assert_eq!(render_name("{state}.pbf", state, timestamp), "42.pbf");
/// assert_eq!(
///     render_name("planet-{timestamp}.pbf", state, timestamp),
///     "planet-2024-05-01T12:00:00.000Z.pbf"
/// );
/// ```
pub fn render_name(format: &str, state: SequenceNumber, timestamp: DateTime<Utc>) -> String {
    let state = state.to_string();
    let timestamp = timestamp.to_rfc3339_opts(SecondsFormat::Millis, true);
    let vars = [
        ("state", state.as_str()),
        ("sequenceNumber", state.as_str()),
        ("timestamp", timestamp.as_str()),
    ];

    vars.iter().fold(format.to_string(), |name, (key, value)| {
        name.replace(&format!("{{{key}}}"), value)
    })
}

/// File name of the primary dump matching a rendered output name.
///
/// ```
/// assert_eq!(planet_dumper_exec::primary_artifact_name("42.pbf"), "42.dmp");
/// assert_eq!(planet_dumper_exec::primary_artifact_name("planet"), "planet.dmp");
/// ```
pub fn primary_artifact_name(name: &str) -> String {
    Path::new(name)
        .with_extension(PRIMARY_EXTENSION)
        .to_string_lossy()
        .into_owned()
}
