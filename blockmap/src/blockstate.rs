//! Block states and the id registry that interns them.
//!
//! The renderer's inner loop wants to hash plain integers, not strings, so
//! every distinct block state is interned once and referenced by a 16-bit id
//! from then on.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::sync::{Arc, Mutex, OnceLock};

use tracing::warn;

/// Id of the reserved "unknown" block state.
pub const UNKNOWN_BLOCK_ID: u16 = 0;

const MAX_STATES: usize = u16::MAX as usize + 1;

/// A block state: a block name plus its ordered property map.
///
/// Properties are kept in a sorted map so the textual form of a state is
/// canonical: `name[k1=v1,k2=v2]` with keys in ascending order. That form is
/// the equality and ordering key.
#[derive(Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BlockState {
    name: String,
    properties: BTreeMap<String, String>,
}

impl BlockState {
    pub fn new(name: impl Into<String>) -> BlockState {
        BlockState {
            name: name.into(),
            properties: BTreeMap::new(),
        }
    }

    pub fn air() -> BlockState {
        BlockState::new("minecraft:air")
    }

    /// Parses a state from a name and a `k1=v1,k2=v2` property description.
    ///
    /// Empty segments are ignored, so a trailing comma is fine.
    pub fn parse(name: &str, variant_description: &str) -> BlockState {
        let mut state = BlockState::new(name);
        for entry in variant_description.split(',') {
            if entry.is_empty() {
                continue;
            }
            if let Some((key, value)) = entry.split_once('=') {
                state.properties.insert(key.to_string(), value.to_string());
            }
        }
        state
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn properties(&self) -> impl Iterator<Item = (&str, &str)> {
        self.properties
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn has_property(&self, key: &str) -> bool {
        self.properties.contains_key(key)
    }

    pub fn property(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }

    pub fn set_property(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.properties.insert(key.into(), value.into());
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> BlockState {
        self.set_property(key, value);
        self
    }

    /// The `k1=v1,k2=v2` part of the canonical form.
    pub fn variant_description(&self) -> String {
        let mut out = String::new();
        for (key, value) in &self.properties {
            if !out.is_empty() {
                out.push(',');
            }
            out.push_str(key);
            out.push('=');
            out.push_str(value);
        }
        out
    }
}

impl fmt::Display for BlockState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.properties.is_empty() {
            write!(f, "{}", self.name)
        } else {
            write!(f, "{}[{}]", self.name, self.variant_description())
        }
    }
}

struct RegistryInner {
    /// name -> variant description -> id
    lookup: HashMap<String, HashMap<String, u16>>,
    next_id: usize,
    /// Per block name, the property keys that matter for sprite selection.
    known_properties: HashMap<String, BTreeSet<String>>,
    overflow_warned: bool,
}

/// Assigns a stable 16-bit id to every distinct block state of a run.
///
/// Interning takes one mutex; resolving an already-interned id back to its
/// state is lock-free. Id 0 is reserved for the unknown block. Ids are not
/// persisted across runs.
pub struct BlockStateRegistry {
    inner: Mutex<RegistryInner>,
    states: Box<[OnceLock<Arc<BlockState>>]>,
    air_id: u16,
}

impl BlockStateRegistry {
    pub fn new() -> BlockStateRegistry {
        let states: Box<[OnceLock<Arc<BlockState>>]> =
            (0..MAX_STATES).map(|_| OnceLock::new()).collect();

        let unknown = BlockState::new("blockmap:unknown");
        states[UNKNOWN_BLOCK_ID as usize]
            .set(Arc::new(unknown.clone()))
            .ok();

        let mut lookup: HashMap<String, HashMap<String, u16>> = HashMap::new();
        lookup
            .entry(unknown.name().to_string())
            .or_default()
            .insert(unknown.variant_description(), UNKNOWN_BLOCK_ID);

        let registry = BlockStateRegistry {
            inner: Mutex::new(RegistryInner {
                lookup,
                next_id: 1,
                known_properties: HashMap::new(),
                overflow_warned: false,
            }),
            states,
            air_id: 0,
        };

        let mut registry = registry;
        registry.air_id = registry.get_or_intern(&BlockState::air());
        registry
    }

    /// Id used for air, also returned for blocks outside the world crop.
    pub fn air_id(&self) -> u16 {
        self.air_id
    }

    /// Interns a state, returning its id. Concurrent calls with equal states
    /// return identical ids.
    pub fn get_or_intern(&self, state: &BlockState) -> u16 {
        let mut inner = self.inner.lock().expect("block state registry poisoned");
        let variant = state.variant_description();
        if let Some(id) = inner
            .lookup
            .get(state.name())
            .and_then(|variants| variants.get(&variant))
        {
            return *id;
        }

        if inner.next_id >= MAX_STATES {
            if !inner.overflow_warned {
                inner.overflow_warned = true;
                warn!(
                    state = %state,
                    "block state registry is full, further states render as unknown"
                );
            }
            return UNKNOWN_BLOCK_ID;
        }

        let id = inner.next_id as u16;
        inner.next_id += 1;
        inner
            .lookup
            .entry(state.name().to_string())
            .or_default()
            .insert(variant, id);
        self.states[id as usize].set(Arc::new(state.clone())).ok();
        id
    }

    /// Resolves an id back to its state. Lock-free.
    ///
    /// Ids that were never handed out resolve to the unknown state.
    pub fn get_state(&self, id: u16) -> Arc<BlockState> {
        self.states[id as usize]
            .get()
            .or_else(|| self.states[UNKNOWN_BLOCK_ID as usize].get())
            .expect("unknown block state is interned at construction")
            .clone()
    }

    /// Declares a property key relevant for sprite selection of a block.
    pub fn add_known_property(&self, block: &str, property: &str) {
        let mut inner = self.inner.lock().expect("block state registry poisoned");
        inner
            .known_properties
            .entry(block.to_string())
            .or_default()
            .insert(property.to_string());
    }

    pub fn is_known_property(&self, block: &str, property: &str) -> bool {
        let inner = self.inner.lock().expect("block state registry poisoned");
        inner
            .known_properties
            .get(block)
            .is_some_and(|props| props.contains(property))
    }

    /// The state with unknown property keys stripped, used as the sprite
    /// cache key. The full state stays available under its own id.
    pub fn sprite_state(&self, state: &BlockState) -> BlockState {
        let inner = self.inner.lock().expect("block state registry poisoned");
        let known = inner.known_properties.get(state.name());
        let mut stripped = BlockState::new(state.name());
        if let Some(known) = known {
            for (key, value) in state.properties() {
                if known.contains(key) {
                    stripped.set_property(key, value);
                }
            }
        }
        stripped
    }

    /// Id of the sprite-cache key for an interned state.
    pub fn sprite_key_id(&self, id: u16) -> u16 {
        let state = self.get_state(id);
        let stripped = self.sprite_state(&state);
        if stripped == *state {
            id
        } else {
            self.get_or_intern(&stripped)
        }
    }
}

impl Default for BlockStateRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for BlockStateRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock().expect("block state registry poisoned");
        f.debug_struct("BlockStateRegistry")
            .field("states", &inner.next_id)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::sync::Arc;

    #[test]
    fn test_variant_description_is_sorted() {
        let state = BlockState::new("minecraft:furnace")
            .with_property("lit", "true")
            .with_property("facing", "north");
        assert_eq!(state.variant_description(), "facing=north,lit=true");
        assert_eq!(state.to_string(), "minecraft:furnace[facing=north,lit=true]");
    }

    #[test]
    fn test_parse_ignores_empty_segments() {
        let state = BlockState::parse("minecraft:water", "level=0,");
        assert_eq!(state.property("level"), Some("0"));
        assert_eq!(state.properties().count(), 1);
    }

    #[test]
    fn test_intern_is_deduplicating() {
        let registry = BlockStateRegistry::new();
        let a = BlockState::new("minecraft:stone");
        let b = BlockState::parse("minecraft:stone", "");
        assert_eq!(registry.get_or_intern(&a), registry.get_or_intern(&b));

        let c = BlockState::new("minecraft:stone").with_property("foo", "bar");
        assert_ne!(registry.get_or_intern(&a), registry.get_or_intern(&c));
    }

    #[test]
    fn test_air_is_interned_at_construction() {
        let registry = BlockStateRegistry::new();
        assert_ne!(registry.air_id(), UNKNOWN_BLOCK_ID);
        assert_eq!(registry.get_state(registry.air_id()).name(), "minecraft:air");
    }

    #[test]
    fn test_unreserved_id_resolves_to_unknown() {
        let registry = BlockStateRegistry::new();
        assert_eq!(registry.get_state(9999).name(), "blockmap:unknown");
    }

    #[test]
    fn test_known_property_stripping() {
        let registry = BlockStateRegistry::new();
        registry.add_known_property("minecraft:water", "level");

        let state = BlockState::new("minecraft:water")
            .with_property("level", "2")
            .with_property("some_mod_extra", "yes");
        let stripped = registry.sprite_state(&state);
        assert_eq!(stripped.property("level"), Some("2"));
        assert!(!stripped.has_property("some_mod_extra"));

        // A block with no known properties strips everything.
        let other = BlockState::new("minecraft:stone").with_property("weird", "1");
        assert_eq!(registry.sprite_state(&other), BlockState::new("minecraft:stone"));
    }

    #[test]
    fn test_sprite_key_id_interns_stripped_state() {
        let registry = BlockStateRegistry::new();
        registry.add_known_property("minecraft:oak_leaves", "persistent");

        let full = BlockState::new("minecraft:oak_leaves")
            .with_property("persistent", "false")
            .with_property("distance", "3");
        let id = registry.get_or_intern(&full);
        let key = registry.sprite_key_id(id);
        assert_ne!(id, key);
        assert_eq!(
            *registry.get_state(key),
            BlockState::new("minecraft:oak_leaves").with_property("persistent", "false")
        );

        // A state that is already canonical keys to itself.
        let plain = registry.get_or_intern(&BlockState::new("minecraft:stone"));
        assert_eq!(registry.sprite_key_id(plain), plain);
    }

    #[test]
    fn test_concurrent_intern_agrees_on_ids() {
        let registry = Arc::new(BlockStateRegistry::new());
        let mut handles = Vec::new();
        for _ in 0..8 {
            let registry = Arc::clone(&registry);
            handles.push(std::thread::spawn(move || {
                (0..100)
                    .map(|i| {
                        let state =
                            BlockState::new("minecraft:wool").with_property("color", i.to_string());
                        registry.get_or_intern(&state)
                    })
                    .collect::<Vec<_>>()
            }));
        }
        let results: Vec<Vec<u16>> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        for ids in &results[1..] {
            assert_eq!(ids, &results[0], "all threads must agree on interned ids");
        }
    }

    proptest! {
        #[test]
        fn test_parse_roundtrips_canonical_form(
            name in "[a-z_]{1,12}",
            props in proptest::collection::btree_map("[a-z]{1,6}", "[a-z0-9]{1,6}", 0..4),
        ) {
            let mut state = BlockState::new(name.clone());
            for (k, v) in &props {
                state.set_property(k.clone(), v.clone());
            }
            let reparsed = BlockState::parse(&name, &state.variant_description());
            prop_assert_eq!(reparsed, state);
        }

        #[test]
        fn test_equality_matches_intern_identity(
            a_props in proptest::collection::btree_map("[a-z]{1,4}", "[a-z]{1,4}", 0..3),
            b_props in proptest::collection::btree_map("[a-z]{1,4}", "[a-z]{1,4}", 0..3),
        ) {
            let registry = BlockStateRegistry::new();
            let mut a = BlockState::new("minecraft:thing");
            let mut b = BlockState::new("minecraft:thing");
            for (k, v) in &a_props { a.set_property(k.clone(), v.clone()); }
            for (k, v) in &b_props { b.set_property(k.clone(), v.clone()); }
            let same_state = a == b;
            let same_id = registry.get_or_intern(&a) == registry.get_or_intern(&b);
            prop_assert_eq!(same_state, same_id);
        }
    }
}
