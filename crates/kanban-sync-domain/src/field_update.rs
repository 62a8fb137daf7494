/// Three-state update for an optional entity field inside a partial patch.
///
/// ```
/// use kanban_sync_domain::FieldUpdate;
///
/// let mut assignee = Some("mina".to_string());
/// FieldUpdate::Set("joon".to_string()).apply_to(&mut assignee);
/// assert_eq!(assignee, Some("joon".to_string()));
///
/// FieldUpdate::<String>::Clear.apply_to(&mut assignee);
/// assert_eq!(assignee, None);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldUpdate<T> {
    /// Keep the existing value
    NoChange,
    /// Replace with the provided value
    Set(T),
    /// Set to None
    Clear,
}

impl<T> Default for FieldUpdate<T> {
    fn default() -> Self {
        FieldUpdate::NoChange
    }
}

impl<T> FieldUpdate<T> {
    pub fn apply_to(self, field: &mut Option<T>) {
        match self {
            FieldUpdate::NoChange => {}
            FieldUpdate::Set(value) => *field = Some(value),
            FieldUpdate::Clear => *field = None,
        }
    }

    pub fn is_change(&self) -> bool {
        !matches!(self, FieldUpdate::NoChange)
    }

    /// The value this update would write, if it writes one.
    pub fn as_set(&self) -> Option<&T> {
        match self {
            FieldUpdate::Set(value) => Some(value),
            _ => None,
        }
    }
}

impl<T> From<Option<T>> for FieldUpdate<T> {
    fn from(opt: Option<T>) -> Self {
        match opt {
            Some(value) => FieldUpdate::Set(value),
            None => FieldUpdate::Clear,
        }
    }
}
