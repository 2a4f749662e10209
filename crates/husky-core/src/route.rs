//! Message id routing keys: `<server>.<message>`.

/// Separator between the server name and the message name.
pub const SEPARATOR: char = '.';

/// Prefix `message` with `server` (when non-empty), then split the result
/// on the first separator.
///
/// The same function both builds and parses routing keys:
/// `route_message("hall", "Enter")` and `route_message("", "hall.Enter")`
/// both yield `("hall", "Enter")`. An id without a separator yields an empty
/// server name.
pub fn route_message(server: &str, message: &str) -> (String, String) {
    let id = if server.is_empty() {
        message.to_string()
    } else {
        compose(server, message)
    };
    let (server, message) = split(&id);
    (server.to_string(), message.to_string())
}

/// Join a server name and a message name into a routing key.
pub fn compose(server: &str, message: &str) -> String {
    format!("{server}{SEPARATOR}{message}")
}

/// Split a routing key on its first separator.
pub fn split(id: &str) -> (&str, &str) {
    match id.split_once(SEPARATOR) {
        Some((server, message)) => (server, message),
        None => ("", id),
    }
}
