/// Generate a fresh random identifier (session ids, request ids, hook
/// invocation ids, ...). Centralized so the id format can change in one
/// place.
pub fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}
