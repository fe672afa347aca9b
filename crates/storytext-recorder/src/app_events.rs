//! Pending application events - "the application reached state X"
//!
//! At most one event is pending per category. Registering an event in the
//! default category wipes everything else; other categories can be marked
//! as superseded by later events in some named category.

use std::collections::{BTreeSet, HashMap};
use tracing::debug;

pub const DEFAULT_CATEGORY: &str = "__default__";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplicationEvent {
    pub name: String,
    pub category: String,
    pub delay: u32,
}

/// Everything drained from the registry in one go. Written as a single
/// `wait for` line at the highest delay among its events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingWait {
    pub events: Vec<ApplicationEvent>,
    pub delay: u32,
}

impl PendingWait {
    /// Comma-separated event names, sorted
    pub fn description(&self) -> String {
        let mut names: Vec<&str> = self.events.iter().map(|e| e.name.as_str()).collect();
        names.sort_unstable();
        names.join(", ")
    }
}

#[derive(Debug, Default)]
pub struct ApplicationEventRegistry {
    entries: Vec<ApplicationEvent>,
    /// superseding category -> categories it discards
    superseded: HashMap<String, BTreeSet<String>>,
}

impl ApplicationEventRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn get(&self, category: &str) -> Option<&ApplicationEvent> {
        self.entries.iter().find(|e| e.category == category)
    }

    pub fn max_delay(&self) -> u32 {
        self.entries.iter().map(|e| e.delay).max().unwrap_or(0)
    }

    /// Registers `name` in `category`. `superseded_by` names categories whose
    /// future events discard this one. `delay` is never lower than `floor`,
    /// the highest delay currently buffered by the recorder.
    pub fn register(
        &mut self,
        name: &str,
        category: Option<&str>,
        superseded_by: &[String],
        delay: u32,
        floor: u32,
    ) {
        let category = category.unwrap_or(DEFAULT_CATEGORY).to_string();
        let delay = delay.max(floor);
        let name = match self.get(&category) {
            Some(existing) => next_multiple(&existing.name, name),
            None => name.to_string(),
        };
        debug!(event = %name, category = %category, delay, "got application event");

        if category == DEFAULT_CATEGORY {
            self.entries.clear();
            self.superseded.clear();
            self.entries.push(ApplicationEvent { name, category, delay });
            return;
        }

        match self.entries.iter_mut().find(|e| e.category == category) {
            Some(entry) => {
                entry.name = name;
                entry.delay = delay;
            }
            None => self.entries.push(ApplicationEvent {
                name,
                category: category.clone(),
                delay,
            }),
        }

        if let Some(victims) = self.superseded.get(&category) {
            self.entries.retain(|e| {
                let discard = e.category != category && victims.contains(&e.category);
                if discard {
                    debug!(event = %e.name, by = %category, "superseded application event");
                }
                !discard
            });
        }
        for by in superseded_by {
            self.superseded
                .entry(by.clone())
                .or_default()
                .insert(category.clone());
        }
    }

    /// Drains every pending event
    pub fn take_pending(&mut self) -> Option<PendingWait> {
        if self.entries.is_empty() {
            return None;
        }
        let events = std::mem::take(&mut self.entries);
        let delay = events.iter().map(|e| e.delay).max().unwrap_or(0);
        Some(PendingWait { events, delay })
    }

    /// A collaborator learned the real name/category of events it registered
    /// provisionally. Pending events in `old_category` are re-registered in
    /// `new_category` with `old_name` replaced by `new_name`.
    pub fn rename(
        &mut self,
        old_name: &str,
        new_name: &str,
        old_category: Option<&str>,
        new_category: Option<&str>,
    ) {
        let old_category = old_category.unwrap_or(DEFAULT_CATEGORY);
        let new_category = new_category.unwrap_or(DEFAULT_CATEGORY);
        let (moved, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut self.entries)
            .into_iter()
            .partition(|e| e.category == old_category);
        self.entries = kept;

        for event in moved {
            let renamed = event.name.replace(old_name, new_name);
            self.register(&renamed, Some(new_category), &[], event.delay, 0);
        }

        // what old_category superseded stays keyed under it
        for (by, superseded) in self.superseded.iter_mut() {
            if superseded.remove(old_category) {
                superseded.insert(new_category.to_string());
                debug!(superseder = %by, from = old_category, to = new_category, "swapped supersede info");
            }
        }
    }

    /// Moves a pending, undelayed event with exactly this name to level 1
    pub fn delay_event(&mut self, name: &str) {
        if let Some(entry) = self.entries.iter_mut().find(|e| e.name == name && e.delay == 0) {
            debug!(event = name, "delaying application event to level 1");
            entry.delay = 1;
        }
    }

    /// Removes one occurrence of the first event `pred(name, delay)` accepts.
    /// An `x * 3` entry becomes `x * 2`.
    pub fn unregister<F>(&mut self, pred: F) -> bool
    where
        F: Fn(&str, u32) -> bool,
    {
        let Some(pos) = self.entries.iter().position(|e| pred(&e.name, e.delay)) else {
            return false;
        };
        let (base, count) = parse_multiples(&self.entries[pos].name);
        if count <= 1 {
            let removed = self.entries.remove(pos);
            debug!(event = %removed.name, category = %removed.category, "unregistered application event");
        } else {
            let reduced = make_multiple(base, count - 1);
            debug!(event = %reduced, "reduced application event count");
            self.entries[pos].name = reduced;
        }
        true
    }
}

/// `name` registered again while `existing` is still pending
fn next_multiple(existing: &str, name: &str) -> String {
    if existing == name {
        return make_multiple(name, 2);
    }
    match parse_multiples(existing) {
        (base, count) if base == name && count > 1 => make_multiple(name, count + 1),
        _ => name.to_string(),
    }
}

pub fn make_multiple(text: &str, count: u32) -> String {
    if count == 1 {
        text.to_string()
    } else {
        format!("{} * {}", text, count)
    }
}

/// Splits `"name * k"` into `("name", k)`; anything else counts once.
pub fn parse_multiples(text: &str) -> (&str, u32) {
    if let Some((base, count)) = text.rsplit_once(" * ") {
        if let Ok(count) = count.parse::<u32>() {
            if !base.is_empty() {
                return (base, count);
            }
        }
    }
    (text, 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(reg: &mut ApplicationEventRegistry) -> String {
        reg.take_pending().map(|w| w.description()).unwrap_or_default()
    }

    #[test]
    fn default_category_clears_everything() {
        let mut reg = ApplicationEventRegistry::new();
        reg.register("job done", Some("jobs"), &[], 0, 0);
        reg.register("file written", Some("files"), &[], 0, 0);
        reg.register("idle", None, &[], 0, 0);
        assert_eq!(reg.len(), 1);
        assert_eq!(names(&mut reg), "idle");
        assert!(reg.is_empty());
    }

    #[test]
    fn one_entry_per_category_counts_repeats() {
        let mut reg = ApplicationEventRegistry::new();
        reg.register("poll", Some("c"), &[], 0, 0);
        reg.register("poll", Some("c"), &[], 0, 0);
        assert_eq!(reg.get("c").unwrap().name, "poll * 2");
        reg.register("poll", Some("c"), &[], 0, 0);
        assert_eq!(reg.get("c").unwrap().name, "poll * 3");
        reg.register("other", Some("c"), &[], 0, 0);
        assert_eq!(reg.get("c").unwrap().name, "other");
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn supersession_discards_marked_categories() {
        let mut reg = ApplicationEventRegistry::new();
        reg.register("E0", Some("C0"), &[], 0, 0);
        reg.register("E1", Some("C1"), &["C2".to_string()], 0, 0);
        reg.register("E2", Some("C2"), &[], 0, 0);
        assert!(reg.get("C1").is_none());
        assert_eq!(names(&mut reg), "E0, E2");
    }

    #[test]
    fn delay_is_promoted_to_buffered_floor() {
        let mut reg = ApplicationEventRegistry::new();
        reg.register("a", Some("x"), &[], 0, 2);
        reg.register("b", Some("y"), &[], 3, 1);
        let wait = reg.take_pending().unwrap();
        assert_eq!(wait.delay, 3);
        assert_eq!(wait.events[0].delay, 2);
    }

    #[test]
    fn rename_moves_category_and_name() {
        let mut reg = ApplicationEventRegistry::new();
        reg.register("completion of job 7", Some("pending"), &["done".to_string()], 1, 0);
        reg.register("x", Some("a"), &["pending".to_string()], 0, 0);
        reg.rename("job 7", "build", Some("pending"), Some("jobs"));
        let entry = reg.get("jobs").unwrap();
        assert_eq!(entry.name, "completion of build");
        assert_eq!(entry.delay, 1);
        assert!(reg.get("pending").is_none());
        // "pending" superseded "a"; "jobs" does not inherit that
        assert!(reg.get("a").is_some());
        reg.register("completion of other", Some("jobs"), &[], 0, 0);
        assert!(reg.get("a").is_some());
        // "done" supersedes whatever "pending" became
        reg.register("finished", Some("done"), &[], 0, 0);
        assert!(reg.get("jobs").is_none());
        assert_eq!(names(&mut reg), "finished, x");
    }

    #[test]
    fn delay_and_unregister() {
        let mut reg = ApplicationEventRegistry::new();
        reg.register("tick", Some("t"), &[], 0, 0);
        reg.register("tick", Some("t"), &[], 0, 0);
        reg.delay_event("tick * 2");
        assert_eq!(reg.max_delay(), 1);
        assert!(reg.unregister(|name, _| name.starts_with("tick")));
        assert_eq!(reg.get("t").unwrap().name, "tick");
        assert!(reg.unregister(|name, _| name == "tick"));
        assert!(reg.is_empty());
        assert!(!reg.unregister(|_, _| true));
    }

    #[test]
    fn multiples_parse() {
        assert_eq!(parse_multiples("a b * 4"), ("a b", 4));
        assert_eq!(parse_multiples("a * b"), ("a * b", 1));
        assert_eq!(parse_multiples("plain"), ("plain", 1));
        assert_eq!(make_multiple("x", 1), "x");
    }
}
