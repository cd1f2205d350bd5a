//! Binding resolver.
//!
//! Turns the markers visible to one receiver entry point into an ordered
//! decorator list and an ordered observer list.
//!
//! # Default Order
//!
//! Markers are collected from the broadest scope to the narrowest:
//!
//! ```text
//! global  ->  module prefix  ->  receiver type  ->  entry point
//! ```
//!
//! so global decorators wrap outermost. When a kind is declared at several
//! scopes the narrowest declaration wins, keeping the broader one's slot.
//!
//! # Order Constraints
//!
//! An entry (or, failing that, its receiver) may name marker kinds in the
//! order they must apply. The slots held by the named kinds are refilled in
//! the constraint's sequence; every other marker keeps its slot. Kinds named
//! but not present are ignored.

use std::any::TypeId;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::{Mutex, RwLock};
use tracing::{debug, trace};

use crate::foundation::{Marker, MarkerKind, RegistrationError, RegistrationResult};
use crate::framework::decorator::{Binding, Decorator, Observer};
use crate::framework::registry::EntryId;

/// Identifies a receiver across registrations.
///
/// Typed receivers share a key since their table comes from one `declare`.
/// Static tables are built by a closure per call, so each static
/// registration gets its own key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum ReceiverKey {
    Type(TypeId),
    Static(EntryId),
}

/// The static markers and constraints of one entry point.
#[derive(Debug, Clone)]
pub(crate) struct Declaration {
    pub(crate) module: &'static str,
    pub(crate) receiver_markers: Vec<Marker>,
    pub(crate) receiver_order: Option<Vec<MarkerKind>>,
    pub(crate) entry_markers: Vec<Marker>,
    pub(crate) entry_order: Option<Vec<MarkerKind>>,
}

impl Declaration {
    fn constraint(&self) -> Option<&[MarkerKind]> {
        self.entry_order
            .as_deref()
            .or(self.receiver_order.as_deref())
    }
}

/// The resolved decorator and observer chains of one entry point.
pub(crate) struct Resolution {
    pub(crate) decorators: Vec<(Marker, Arc<dyn Decorator>)>,
    pub(crate) observers: Vec<(Marker, Arc<dyn Observer>)>,
    pub(crate) ordered: bool,
}

impl Resolution {
    pub(crate) fn decorator_tags(&self) -> Vec<String> {
        self.decorators.iter().map(|(m, _)| m.tag()).collect()
    }

    pub(crate) fn observer_tags(&self) -> Vec<String> {
        self.observers.iter().map(|(m, _)| m.tag()).collect()
    }
}

#[derive(Default)]
struct Scopes {
    global: Vec<Marker>,
    modules: Vec<(String, Vec<Marker>)>,
}

type CacheKey = (ReceiverKey, &'static str);

pub(crate) struct Resolver {
    bindings: HashMap<MarkerKind, Binding>,
    scopes: RwLock<Scopes>,
    cache: RwLock<HashMap<CacheKey, Arc<Resolution>>>,
    generation: AtomicU64,
    created: Mutex<Vec<Arc<dyn Observer>>>,
}

impl Resolver {
    pub(crate) fn new(bindings: HashMap<MarkerKind, Binding>) -> Self {
        Self {
            bindings,
            scopes: RwLock::new(Scopes::default()),
            cache: RwLock::new(HashMap::new()),
            generation: AtomicU64::new(0),
            created: Mutex::new(Vec::new()),
        }
    }

    /// Fails with [`RegistrationError::UnboundMarker`] for unknown kinds.
    pub(crate) fn validate(&self, marker: &Marker) -> RegistrationResult<()> {
        let kind = marker.kind();
        if *kind == MarkerKind::ORDERED || self.bindings.contains_key(kind) {
            Ok(())
        } else {
            Err(RegistrationError::UnboundMarker { kind: kind.clone() })
        }
    }

    pub(crate) fn add_global(&self, marker: Marker) -> RegistrationResult<()> {
        self.validate(&marker)?;
        self.scopes.write().global.push(marker);
        self.invalidate();
        Ok(())
    }

    pub(crate) fn add_module(&self, prefix: String, markers: Vec<Marker>) -> RegistrationResult<()> {
        for marker in &markers {
            self.validate(marker)?;
        }
        {
            let mut scopes = self.scopes.write();
            match scopes.modules.iter_mut().find(|(p, _)| *p == prefix) {
                Some((_, existing)) => existing.extend(markers),
                None => scopes.modules.push((prefix, markers)),
            }
        }
        self.invalidate();
        Ok(())
    }

    fn invalidate(&self) {
        let mut cache = self.cache.write();
        self.generation.fetch_add(1, Ordering::AcqRel);
        cache.clear();
        debug!("Binding resolution cache invalidated");
    }

    /// Drops the cached resolutions of `key`.
    pub(crate) fn forget(&self, key: ReceiverKey) {
        self.cache.write().retain(|(k, _), _| *k != key);
    }

    /// Returns the cached resolution, computing it on a miss.
    ///
    /// A resolution computed while the scopes changed is thrown away and
    /// computed again, so the cache never holds one built from old scopes.
    pub(crate) fn resolve(
        &self,
        key: ReceiverKey,
        entry: &'static str,
        decl: &Declaration,
    ) -> RegistrationResult<Arc<Resolution>> {
        loop {
            let generation = {
                let cache = self.cache.read();
                if let Some(hit) = cache.get(&(key, entry)) {
                    return Ok(hit.clone());
                }
                self.generation.load(Ordering::Acquire)
            };

            let computed = Arc::new(self.compute(decl)?);
            let stored = {
                let mut cache = self.cache.write();
                if self.generation.load(Ordering::Acquire) != generation {
                    None
                } else {
                    Some(cache.entry((key, entry)).or_insert_with(|| computed.clone()).clone())
                }
            };

            let Some(stored) = stored else {
                trace!(entry, "Scopes changed during resolution, retrying");
                discard(&computed);
                continue;
            };
            if !Arc::ptr_eq(&stored, &computed) {
                discard(&computed);
                return Ok(stored);
            }

            self.created
                .lock()
                .extend(stored.observers.iter().map(|(_, o)| o.clone()));
            trace!(
                entry,
                decorators = ?stored.decorator_tags(),
                observers = ?stored.observer_tags(),
                ordered = stored.ordered,
                "Resolved bindings"
            );
            return Ok(stored);
        }
    }

    fn compute(&self, decl: &Declaration) -> RegistrationResult<Resolution> {
        let mut markers: Vec<Marker> = Vec::new();
        {
            let scopes = self.scopes.read();
            let modules = scopes
                .modules
                .iter()
                .filter(|(prefix, _)| module_matches(decl.module, prefix))
                .flat_map(|(_, m)| m.iter());
            let visible = scopes
                .global
                .iter()
                .chain(modules)
                .chain(decl.receiver_markers.iter())
                .chain(decl.entry_markers.iter());
            for marker in visible {
                match markers.iter_mut().find(|m| m.kind() == marker.kind()) {
                    Some(slot) => *slot = marker.clone(),
                    None => markers.push(marker.clone()),
                }
            }
        }

        let mut ordered = false;
        let mut decorators = Vec::new();
        let mut observers = Vec::new();
        for marker in markers {
            if *marker.kind() == MarkerKind::ORDERED {
                ordered = true;
                continue;
            }
            match self.bindings.get(marker.kind()) {
                Some(Binding::Decorator(d)) => decorators.push((marker, d.clone())),
                Some(Binding::Observer(factory)) => observers.push((marker, factory.clone())),
                None => {
                    return Err(RegistrationError::UnboundMarker {
                        kind: marker.kind().clone(),
                    });
                }
            }
        }

        if let Some(constraint) = decl.constraint() {
            decorators = apply_order(decorators, constraint, |(m, _)| m.kind());
            observers = apply_order(observers, constraint, |(m, _)| m.kind());
        }

        let observers = observers
            .into_iter()
            .map(|(marker, factory)| {
                let mut observer = factory();
                observer.initialize(&marker);
                (marker, Arc::<dyn Observer>::from(observer))
            })
            .collect();

        Ok(Resolution {
            decorators,
            observers,
            ordered,
        })
    }

    /// Calls [`Observer::shutdown`] once on every observer created so far.
    pub(crate) fn shutdown_observers(&self) {
        let created = std::mem::take(&mut *self.created.lock());
        for observer in created {
            observer.shutdown();
        }
    }
}

/// Shuts down the observers of a resolution that never reached the cache.
fn discard(resolution: &Resolution) {
    for (_, observer) in &resolution.observers {
        observer.shutdown();
    }
}

fn module_matches(module: &str, prefix: &str) -> bool {
    module == prefix
        || module
            .strip_prefix(prefix)
            .is_some_and(|rest| rest.starts_with("::"))
}

/// Reorders `items` so the kinds named by `constraint` follow its sequence.
///
/// Items whose kind is named are taken out of their slots, sorted by the
/// kind's first position in the constraint (stable), and put back into the
/// same set of slots. Unnamed items do not move.
pub(crate) fn apply_order<T>(
    items: Vec<T>,
    constraint: &[MarkerKind],
    kind_of: impl Fn(&T) -> &MarkerKind,
) -> Vec<T> {
    let mut rank: HashMap<&MarkerKind, usize> = HashMap::new();
    for kind in constraint {
        let next = rank.len();
        rank.entry(kind).or_insert(next);
    }

    let mut slots = Vec::new();
    let mut taken = Vec::new();
    let mut out: Vec<Option<T>> = Vec::with_capacity(items.len());
    for (idx, item) in items.into_iter().enumerate() {
        match rank.get(kind_of(&item)).copied() {
            Some(r) => {
                slots.push(idx);
                taken.push((r, item));
                out.push(None);
            }
            None => out.push(Some(item)),
        }
    }

    taken.sort_by_key(|(r, _)| *r);
    for (slot, (_, item)) in slots.into_iter().zip(taken) {
        out[slot] = Some(item);
    }
    out.into_iter().flatten().collect()
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::framework::decorator::{ObserveContext, ObserverFactory, WrapContext};
    use crate::framework::work::Work;

    struct Named(&'static str);

    impl Decorator for Named {
        fn marker_kind(&self) -> MarkerKind {
            MarkerKind::from_static(self.0)
        }

        fn wrap(&self, ctx: WrapContext) -> Option<Work> {
            Some(ctx.into_work())
        }
    }

    struct Quiet;

    impl Observer for Quiet {
        fn observe_event(&self, _ctx: &ObserveContext<'_>) {}
    }

    fn resolver(decorators: &[&'static str], observers: &[&'static str]) -> Resolver {
        let mut bindings = HashMap::new();
        for &name in decorators {
            bindings.insert(
                MarkerKind::from_static(name),
                Binding::Decorator(Arc::new(Named(name))),
            );
        }
        for &name in observers {
            let factory: ObserverFactory = Arc::new(|| Box::new(Quiet));
            bindings.insert(MarkerKind::from_static(name), Binding::Observer(factory));
        }
        Resolver::new(bindings)
    }

    fn decl(receiver: &[&'static str], entry: &[&'static str]) -> Declaration {
        Declaration {
            module: "app::handlers",
            receiver_markers: receiver.iter().map(|k| Marker::new(*k)).collect(),
            receiver_order: None,
            entry_markers: entry.iter().map(|k| Marker::new(*k)).collect(),
            entry_order: None,
        }
    }

    fn key() -> ReceiverKey {
        ReceiverKey::Type(TypeId::of::<Named>())
    }

    fn kinds(items: &[(Marker, Arc<dyn Decorator>)]) -> Vec<&str> {
        items.iter().map(|(m, _)| m.kind().as_str()).collect()
    }

    fn order(kinds: &[&'static str]) -> Vec<MarkerKind> {
        kinds.iter().map(|k| MarkerKind::from_static(*k)).collect()
    }

    #[test]
    fn test_subset_constraint_reorders_named_only() {
        let items = order(&["a", "b", "c", "d"]);

        let same = apply_order(items.clone(), &order(&["a", "b"]), |k| k);
        assert_eq!(same, order(&["a", "b", "c", "d"]));

        let swapped = apply_order(items.clone(), &order(&["b", "a"]), |k| k);
        assert_eq!(swapped, order(&["b", "a", "c", "d"]));

        let apart = apply_order(items.clone(), &order(&["d", "a"]), |k| k);
        assert_eq!(apart, order(&["d", "b", "c", "a"]));
    }

    #[test]
    fn test_absent_and_repeated_constraint_kinds_are_ignored() {
        let items = order(&["a", "b", "c"]);
        let out = apply_order(items, &order(&["zz", "c", "a", "c", "yy"]), |k| k);
        assert_eq!(out, order(&["c", "b", "a"]));
        assert!(apply_order(Vec::<MarkerKind>::new(), &order(&["a"]), |k| k).is_empty());
    }

    #[test]
    fn test_default_order_is_global_module_receiver_entry() {
        let resolver = resolver(&["g", "m", "r", "e"], &[]);
        resolver.add_global(Marker::new("g")).unwrap();
        resolver
            .add_module("app".to_string(), vec![Marker::new("m")])
            .unwrap();

        let res = resolver
            .resolve(key(), "on", &decl(&["r"], &["e"]))
            .unwrap();
        assert_eq!(kinds(&res.decorators), ["g", "m", "r", "e"]);
    }

    #[test]
    fn test_narrowest_declaration_wins_in_broad_slot() {
        let resolver = resolver(&["timed", "x"], &[]);
        resolver
            .add_global(Marker::new("timed").with("warn_after_ms", 100))
            .unwrap();

        let mut d = decl(&["x"], &[]);
        d.entry_markers
            .push(Marker::new("timed").with("warn_after_ms", 5));
        let res = resolver.resolve(key(), "on", &d).unwrap();

        assert_eq!(kinds(&res.decorators), ["timed", "x"]);
        assert_eq!(res.decorators[0].0.param::<u64>("warn_after_ms"), Some(5));
    }

    #[test]
    fn test_entry_constraint_overrides_receiver_constraint() {
        let resolver = resolver(&["a", "b", "c"], &["o1", "o2"]);
        let mut d = decl(&["a", "b", "o1", "o2"], &["c"]);
        d.receiver_order = Some(order(&["b", "a"]));

        let res = resolver.resolve(key(), "one", &d).unwrap();
        assert_eq!(kinds(&res.decorators), ["b", "a", "c"]);

        d.entry_order = Some(order(&["c", "o2", "o1"]));
        let res = resolver.resolve(key(), "two", &d).unwrap();
        // the receiver's [b, a] no longer applies and only `c` is named
        assert_eq!(kinds(&res.decorators), ["a", "b", "c"]);
        assert_eq!(res.observer_tags(), ["@o2", "@o1"]);

        d.entry_order = Some(order(&["c", "a"]));
        let res = resolver.resolve(key(), "three", &d).unwrap();
        assert_eq!(kinds(&res.decorators), ["c", "b", "a"]);
        assert_eq!(res.observer_tags(), ["@o1", "@o2"]);
    }

    #[test]
    fn test_ordered_marker_is_consumed() {
        let resolver = resolver(&["a"], &[]);
        let res = resolver
            .resolve(key(), "on", &decl(&["a"], &["ordered"]))
            .unwrap();
        assert!(res.ordered);
        assert_eq!(kinds(&res.decorators), ["a"]);
    }

    #[test]
    fn test_unbound_marker_is_rejected() {
        let resolver = resolver(&[], &[]);
        let err = resolver
            .resolve(key(), "on", &decl(&["ghost"], &[]))
            .err()
            .unwrap();
        assert!(matches!(err, RegistrationError::UnboundMarker { .. }));
        assert!(resolver.add_global(Marker::new("ghost")).is_err());
        assert!(resolver.add_global(Marker::ordered()).is_ok());
    }

    #[test]
    fn test_resolution_is_cached_until_scopes_change() {
        let resolver = resolver(&["a", "g"], &[]);
        let d = decl(&["a"], &[]);
        let first = resolver.resolve(key(), "on", &d).unwrap();
        let second = resolver.resolve(key(), "on", &d).unwrap();
        assert!(Arc::ptr_eq(&first, &second));

        resolver.add_global(Marker::new("g")).unwrap();
        let third = resolver.resolve(key(), "on", &d).unwrap();
        assert_eq!(kinds(&third.decorators), ["g", "a"]);

        resolver.forget(key());
        let fourth = resolver.resolve(key(), "on", &d).unwrap();
        assert!(!Arc::ptr_eq(&third, &fourth));
    }

    #[test]
    fn test_scope_change_during_resolution_is_not_cached_stale() {
        use std::sync::atomic::AtomicBool;
        use std::sync::{OnceLock, Weak};

        static DOWN: AtomicUsize = AtomicUsize::new(0);

        struct Dropped;

        impl Observer for Dropped {
            fn observe_event(&self, _ctx: &ObserveContext<'_>) {}

            fn shutdown(&self) {
                DOWN.fetch_add(1, Ordering::SeqCst);
            }
        }

        // The observer factory runs inside resolution, after the scopes were
        // read, and adds a global marker from there.
        let handle: Arc<OnceLock<Weak<Resolver>>> = Arc::new(OnceLock::new());
        let added = Arc::new(AtomicBool::new(false));
        let factory: ObserverFactory = {
            let handle = handle.clone();
            Arc::new(move || -> Box<dyn Observer> {
                if !added.swap(true, Ordering::SeqCst) {
                    let resolver = handle.get().and_then(Weak::upgrade).unwrap();
                    resolver.add_global(Marker::new("g")).unwrap();
                }
                Box::new(Dropped)
            })
        };

        let mut bindings = HashMap::new();
        bindings.insert(
            MarkerKind::from_static("g"),
            Binding::Decorator(Arc::new(Named("g"))),
        );
        bindings.insert(MarkerKind::from_static("obs"), Binding::Observer(factory));
        let resolver = Arc::new(Resolver::new(bindings));
        handle.set(Arc::downgrade(&resolver)).unwrap();

        let d = decl(&["obs"], &[]);
        let first = resolver.resolve(key(), "on", &d).unwrap();
        assert_eq!(kinds(&first.decorators), ["g"]);
        // the stale attempt's observer was shut down, the cached one was not
        assert_eq!(DOWN.load(Ordering::SeqCst), 1);

        let cached = resolver.resolve(key(), "on", &d).unwrap();
        assert!(Arc::ptr_eq(&first, &cached));
    }

    #[test]
    fn test_module_prefix_matches_path_segments() {
        assert!(module_matches("app::handlers", "app"));
        assert!(module_matches("app", "app"));
        assert!(!module_matches("application", "app"));
    }

    #[test]
    fn test_observers_are_initialized_and_shut_down_once() {
        static INIT: AtomicUsize = AtomicUsize::new(0);
        static DOWN: AtomicUsize = AtomicUsize::new(0);

        struct Counted;

        impl Observer for Counted {
            fn initialize(&mut self, marker: &Marker) {
                assert_eq!(marker.param::<u8>("level"), Some(2));
                INIT.fetch_add(1, Ordering::SeqCst);
            }

            fn observe_event(&self, _ctx: &ObserveContext<'_>) {}

            fn shutdown(&self) {
                DOWN.fetch_add(1, Ordering::SeqCst);
            }
        }

        let mut bindings = HashMap::new();
        let factory: ObserverFactory = Arc::new(|| Box::new(Counted));
        bindings.insert(MarkerKind::from_static("counted"), Binding::Observer(factory));
        let resolver = Resolver::new(bindings);

        let mut d = decl(&[], &[]);
        d.entry_markers.push(Marker::new("counted").with("level", 2));
        resolver.resolve(key(), "on", &d).unwrap();
        resolver.resolve(key(), "on", &d).unwrap();
        assert_eq!(INIT.load(Ordering::SeqCst), 1);

        resolver.shutdown_observers();
        resolver.shutdown_observers();
        assert_eq!(DOWN.load(Ordering::SeqCst), 1);
    }
}
