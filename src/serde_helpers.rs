//! Response decoding for the REST client.
//!
//! With the `tracing` feature, fields the target type does not capture are logged as
//! warnings, and decode failures are logged with the path of the offending field, so
//! contract drift on the server shows up in the logs.

use serde::de::DeserializeOwned;
use serde_json::Value;

/// Deserialize `value`, warning about fields `T` ignores.
///
/// Unknown fields never fail deserialization.
#[cfg(feature = "tracing")]
pub fn deserialize_with_warnings<T: DeserializeOwned>(value: Value) -> crate::Result<T> {
    use std::any::type_name;

    let mut ignored = Vec::new();
    let result: std::result::Result<T, serde_json::Error> =
        serde_ignored::deserialize(&value, |path| ignored.push(path.to_string()));

    match result {
        Ok(decoded) => {
            for path in ignored {
                tracing::warn!(
                    type_name = %type_name::<T>(),
                    field = %path,
                    value = %display_at(&value, &path),
                    "unknown field in API response"
                );
            }
            Ok(decoded)
        }
        Err(e) => {
            let located: std::result::Result<T, _> = serde_path_to_error::deserialize(&value);
            if let Err(located) = located {
                let path = located.path().to_string();
                tracing::error!(
                    type_name = %type_name::<T>(),
                    path = %path,
                    value = %display_at(&value, &path),
                    error = %located.inner(),
                    "deserialization failed"
                );
            }
            Err(e.into())
        }
    }
}

/// Plain deserialization when tracing is disabled.
#[cfg(not(feature = "tracing"))]
pub fn deserialize_with_warnings<T: DeserializeOwned>(value: Value) -> crate::Result<T> {
    Ok(serde_json::from_value(value)?)
}

/// Render the value found at a `serde_ignored` / `serde_path_to_error` path.
#[cfg(feature = "tracing")]
fn display_at(root: &Value, path: &str) -> String {
    root.pointer(&to_pointer(path))
        .map_or_else(|| "<unable to retrieve>".to_owned(), Value::to_string)
}

/// Convert `data[3].sender.name` style paths into a JSON pointer (`/data/3/sender/name`).
/// `?` segments mark `Option` layers and have no JSON counterpart.
#[cfg(feature = "tracing")]
fn to_pointer(path: &str) -> String {
    path.split(['.', '[', ']'])
        .filter(|segment| !segment.is_empty() && *segment != "?")
        .fold(String::new(), |mut pointer, segment| {
            pointer.push('/');
            pointer.push_str(&segment.replace('~', "~0").replace('/', "~1"));
            pointer
        })
}
