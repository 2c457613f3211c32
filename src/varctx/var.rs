use std::collections::HashSet;

/// An ordered, inheritable list with append/remove/join semantics.
///
/// A `Var` stored in a `Context` only knows its own local additions and
/// removals — it has no notion of its parents. A `LazyVar` (built by
/// `Context::lookup`) is the "view" that attaches the resolved parent chain
/// at read time instead of eagerly flattening it on every write.
#[derive(Debug, Clone)]
pub struct Var {
    own: Vec<String>,
    removed: HashSet<String>,
    joiner: String,
    inherit: bool,
}

impl Default for Var {
    fn default() -> Self {
        Self::new()
    }
}

impl Var {
    pub fn new() -> Self {
        Self {
            own: Vec::new(),
            removed: HashSet::new(),
            joiner: " ".to_string(),
            inherit: true,
        }
    }

    pub fn with_joiner(joiner: impl Into<String>) -> Self {
        Self {
            joiner: joiner.into(),
            ..Self::new()
        }
    }

    /// Wrap a single plain value in a non-inheriting Var (`Context` does this
    /// when a plain value is assigned to an attribute name).
    pub fn from_value(value: impl Into<String>) -> Self {
        Self {
            own: vec![value.into()],
            removed: HashSet::new(),
            joiner: " ".to_string(),
            inherit: false,
        }
    }

    pub fn inherit(&self) -> bool {
        self.inherit
    }

    pub fn own(&self) -> &[String] {
        &self.own
    }

    /// Append a value to this Var's own list.
    pub fn append(&mut self, value: impl Into<String>) {
        self.own.push(value.into());
    }

    /// Disable inheritance and replace the own list with a single value.
    pub fn set(&mut self, value: impl Into<String>) {
        self.inherit = false;
        self.own = vec![value.into()];
        self.removed.clear();
    }

    /// Clear this Var's own contribution entirely (parents remain visible).
    pub fn unset(&mut self) {
        self.own.clear();
    }

    /// Clear own additions/removals and re-enable inheritance.
    pub fn reset(&mut self) {
        self.own.clear();
        self.removed.clear();
        self.inherit = true;
    }

    /// Remove entries, recording them in the remove-set so future inherited
    /// additions with the same value are suppressed too.
    pub fn remove(&mut self, value: &str) {
        self.own.retain(|v| v != value);
        self.removed.insert(value.to_string());
    }

    pub fn remove_all(&mut self, values: &[String]) {
        for v in values {
            self.remove(v);
        }
    }
}

/// A lazily-assembled view of a Var together with its resolved parent chain.
/// Built fresh on every `Context::lookup` call.
#[derive(Debug, Clone)]
pub struct LazyVar {
    local: Var,
    parents: Vec<LazyVar>,
}

impl LazyVar {
    pub fn new(local: Var, parents: Vec<LazyVar>) -> Self {
        Self { local, parents }
    }

    pub fn empty() -> Self {
        Self {
            local: Var::new(),
            parents: Vec::new(),
        }
    }

    /// `combined()`: parents in declared order (deduplicated by identity,
    /// i.e. a parent Var contributes once even if reachable via two paths),
    /// followed by own additions, with removals applied last.
    pub fn combined(&self) -> Vec<String> {
        let mut seen_parent_values: Vec<String> = Vec::new();
        self.collect_parents(&mut seen_parent_values);

        let mut removed = self.local.removed.clone();
        self.collect_removed(&mut removed);

        let mut out: Vec<String> = seen_parent_values;
        out.extend(self.local.own.iter().cloned());

        out.retain(|v| !removed.contains(v));
        out
    }

    fn collect_parents(&self, out: &mut Vec<String>) {
        if !self.local.inherit {
            // A non-inheriting local Var (created via `set`) still exposes
            // its own list through `combined`, but does not pull parent
            // contributions in at all.
            return;
        }
        for parent in &self.parents {
            for v in parent.combined() {
                if !out.contains(&v) {
                    out.push(v);
                }
            }
        }
    }

    fn collect_removed(&self, out: &mut HashSet<String>) {
        if !self.local.inherit {
            return;
        }
        for parent in &self.parents {
            out.extend(parent.local.removed.iter().cloned());
            parent.collect_removed(out);
        }
    }

    /// `join(sep)`: shell-friendly string `sep + sep.join(combined)`, empty
    /// if `combined()` is empty. A leading separator lets callers
    /// concatenate several Vars' `join()` output back to back without
    /// double-separating.
    pub fn join(&self, sep: Option<&str>) -> String {
        let combined = self.combined();
        if combined.is_empty() {
            return String::new();
        }
        let sep = sep.unwrap_or(&self.local.joiner);
        format!("{sep}{}", combined.join(sep))
    }

    /// Shell-escaped variant of `join` — wraps any entry containing
    /// whitespace or shell metacharacters in single quotes.
    pub fn shell_join(&self, sep: Option<&str>) -> String {
        let combined = self.combined();
        if combined.is_empty() {
            return String::new();
        }
        let sep = sep.unwrap_or(&self.local.joiner);
        let quoted: Vec<String> = combined.iter().map(|s| shell_quote(s)).collect();
        format!("{sep}{}", quoted.join(sep))
    }

    /// Returns `[format!("{p}{entry}") for entry in combined()]`.
    pub fn prefix(&self, p: &str) -> Vec<String> {
        self.combined().iter().map(|e| format!("{p}{e}")).collect()
    }
}

fn shell_quote(s: &str) -> String {
    if s.chars().all(|c| c.is_ascii_alphanumeric() || "-_./=:+".contains(c)) {
        s.to_string()
    } else {
        format!("'{}'", s.replace('\'', "'\\''"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn combined_is_own_when_no_parents() {
        let mut v = Var::new();
        v.append("a");
        v.append("b");
        let view = LazyVar::new(v, Vec::new());
        assert_eq!(view.combined(), vec!["a", "b"]);
    }

    #[test]
    fn combined_puts_parents_first_deduped() {
        let mut shared = Var::new();
        shared.append("shared");
        let parent_view = LazyVar::new(shared, Vec::new());

        let mut own = Var::new();
        own.append("mine");
        // two paths to the same parent view collapse to one contribution
        let view = LazyVar::new(own, vec![parent_view.clone(), parent_view]);
        assert_eq!(view.combined(), vec!["shared", "mine"]);
    }

    #[test]
    fn remove_suppresses_future_inherited_values() {
        let mut parent = Var::new();
        parent.append("x");
        parent.append("y");
        let parent_view = LazyVar::new(parent, Vec::new());

        let mut own = Var::new();
        own.remove("x");
        let view = LazyVar::new(own, vec![parent_view]);
        assert_eq!(view.combined(), vec!["y"]);
    }

    #[test]
    fn set_disables_inheritance() {
        let mut parent = Var::new();
        parent.append("ignored");
        let parent_view = LazyVar::new(parent, Vec::new());

        let mut own = Var::new();
        own.set("only");
        let view = LazyVar::new(own, vec![parent_view]);
        assert_eq!(view.combined(), vec!["only"]);
    }

    #[test]
    fn join_has_leading_separator_and_is_empty_when_combined_is_empty() {
        let v = Var::new();
        let view = LazyVar::new(v, Vec::new());
        assert_eq!(view.join(Some(" ")), "");

        let mut v2 = Var::new();
        v2.append("a");
        v2.append("b");
        let view2 = LazyVar::new(v2, Vec::new());
        assert_eq!(view2.join(Some(" ")), " a b");
    }

    #[test]
    fn prefix_prepends_to_every_entry() {
        let mut v = Var::new();
        v.append("foo");
        v.append("bar");
        let view = LazyVar::new(v, Vec::new());
        assert_eq!(view.prefix("-I"), vec!["-Ifoo", "-Ibar"]);
    }

    #[test]
    fn shell_join_quotes_entries_with_spaces() {
        let mut v = Var::new();
        v.append("plain");
        v.append("has space");
        let view = LazyVar::new(v, Vec::new());
        assert_eq!(view.shell_join(Some(" ")), " plain 'has space'");
    }
}
