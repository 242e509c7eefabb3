//! Load-path resolution: documents in, entity graph out.
//!
//! A load proceeds in waves. Each wave fetches, in one batched read, every
//! document on the frontier that this load has not seen yet, decodes it into
//! its handle, and follows the references the load paths allow into the next
//! frontier. Every document is decoded once per load: handles are kept in an
//! identity map keyed by document key, and every later pointer to the same
//! key reuses the same handle. Cycles therefore resolve to the same objects
//! instead of looping, and the number of store reads is the number of waves.

use std::collections::{HashMap, HashSet};

use docgraph_store::DocumentStore;
use docgraph_types::{Document, DocumentKey, Value};
use tracing::{debug, warn};

use crate::entity::{AnyEntity, EntityRef};
use crate::error::{DanglingReference, MapperError, MapperResult};
use crate::path::{LoadPaths, NodeId, ROOT};
use crate::registry::schema_of;
use crate::schema::Record;

/// Where a load reads documents from.
pub(crate) trait DocumentSource {
    fn fetch(&self, keys: &[DocumentKey]) -> MapperResult<Vec<Option<Document>>>;
}

/// Reads straight from a store, outside any transaction.
pub(crate) struct StoreSource<'s, S>(pub(crate) &'s S);

impl<S: DocumentStore> DocumentSource for StoreSource<'_, S> {
    fn fetch(&self, keys: &[DocumentKey]) -> MapperResult<Vec<Option<Document>>> {
        Ok(self.0.get_all(keys)?)
    }
}

/// A reference met while decoding one document.
struct Edge {
    field: &'static str,
    store_name: String,
    to: DocumentKey,
}

/// Decoding state shared by every field codec while one document is decoded.
pub struct Decoder<'a> {
    identity: &'a mut HashMap<DocumentKey, Box<dyn AnyEntity>>,
    current: DocumentKey,
    field: Option<(&'static str, String)>,
    edges: Vec<Edge>,
}

impl<'a> Decoder<'a> {
    fn new(identity: &'a mut HashMap<DocumentKey, Box<dyn AnyEntity>>, current: DocumentKey) -> Self {
        Self {
            identity,
            current,
            field: None,
            edges: Vec::new(),
        }
    }

    pub(crate) fn enter_field(
        &mut self,
        name: &'static str,
        store_name: &str,
    ) -> Option<(&'static str, String)> {
        self.field.replace((name, store_name.to_string()))
    }

    pub(crate) fn leave_field(&mut self, outer: Option<(&'static str, String)>) {
        self.field = outer;
    }

    fn field_name(&self) -> String {
        self.field
            .as_ref()
            .map(|(_, store)| store.clone())
            .unwrap_or_default()
    }

    /// A decode error for the field being decoded.
    pub fn invalid(&self, reason: impl Into<String>) -> MapperError {
        MapperError::Decode {
            key: self.current.clone(),
            field: self.field_name(),
            reason: reason.into(),
        }
    }

    /// A decode error for a stored value of the wrong kind.
    pub fn mismatch(&self, expected: &str, found: &Value) -> MapperError {
        self.invalid(format!("expected {expected}, found {}", found.kind_name()))
    }

    /// The handle for `key`: the one already known to this load, or a new
    /// stub that later waves may fill.
    pub fn link<T: Record>(&mut self, key: &DocumentKey) -> MapperResult<EntityRef<T>> {
        let handle = match self.identity.get(key) {
            Some(known) => match known.as_any().downcast_ref::<EntityRef<T>>() {
                Some(handle) => handle.clone(),
                None => {
                    return Err(self.invalid(format!(
                        "{key} is already loaded as {}",
                        known.type_name()
                    )))
                }
            },
            None => {
                let stub = EntityRef::<T>::stub_for(key).map_err(|e| match e {
                    MapperError::Decode { reason, .. } => self.invalid(reason),
                    other => other,
                })?;
                self.identity.insert(key.clone(), Box::new(stub.clone()));
                stub
            }
        };
        if let Some((field, store_name)) = &self.field {
            self.edges.push(Edge {
                field: *field,
                store_name: store_name.clone(),
                to: key.clone(),
            });
        }
        Ok(handle)
    }

    /// Decode an embedded record from a stored map.
    pub fn record<U: Record>(&mut self, value: &Value) -> MapperResult<U> {
        let map = match value {
            Value::Map(map) => map,
            Value::Null => return Ok(U::default()),
            other => return Err(self.mismatch("map", other)),
        };
        let schema = schema_of::<U>()?;
        let mut record = U::default();
        schema.decode_fields(&mut record, map, self)?;
        if let Some(id) = map.get("id").and_then(Value::as_str) {
            schema.set_id(&mut record, id.to_string());
        }
        Ok(record)
    }
}

struct Visit {
    key: DocumentKey,
    node: NodeId,
    via: Option<(DocumentKey, String)>,
}

/// State of one load.
pub(crate) struct Resolver<'p> {
    paths: &'p LoadPaths,
    max_waves: usize,
    identity: HashMap<DocumentKey, Box<dyn AnyEntity>>,
    /// Further caller handles for a root key already in `identity`.
    aliases: HashMap<DocumentKey, Vec<Box<dyn AnyEntity>>>,
    roots: HashSet<DocumentKey>,
    /// Decoded documents and the references found in them.
    edges: HashMap<DocumentKey, Vec<Edge>>,
    missing: HashSet<DocumentKey>,
    expanded: HashSet<(DocumentKey, NodeId)>,
    frontier: Vec<Visit>,
    dangling: Vec<DanglingReference>,
}

impl<'p> Resolver<'p> {
    pub(crate) fn new(paths: &'p LoadPaths, max_waves: usize) -> Self {
        Self {
            paths,
            max_waves,
            identity: HashMap::new(),
            aliases: HashMap::new(),
            roots: HashSet::new(),
            edges: HashMap::new(),
            missing: HashSet::new(),
            expanded: HashSet::new(),
            frontier: Vec::new(),
            dangling: Vec::new(),
        }
    }

    fn register(&mut self, key: &DocumentKey, handle: Box<dyn AnyEntity>) {
        match self.identity.get(key) {
            Some(known) if known.address() == handle.address() => {}
            Some(_) => self.aliases.entry(key.clone()).or_default().push(handle),
            None => {
                self.identity.insert(key.clone(), handle);
            }
        }
        self.roots.insert(key.clone());
    }

    /// Load `handle` from the store. It must carry an identifier.
    pub(crate) fn add_root(&mut self, handle: Box<dyn AnyEntity>) -> MapperResult<()> {
        let key = handle.key()?;
        self.register(&key, handle);
        self.frontier.push(Visit {
            key,
            node: ROOT,
            via: None,
        });
        Ok(())
    }

    /// A root whose document is already at hand, e.g. a query result.
    pub(crate) fn seed(&mut self, handle: Box<dyn AnyEntity>, document: &Document) -> MapperResult<()> {
        let key = handle.key()?;
        self.register(&key, handle);
        self.absorb(&key, document)?;
        self.frontier.push(Visit {
            key,
            node: ROOT,
            via: None,
        });
        Ok(())
    }

    fn seen(&self, key: &DocumentKey) -> bool {
        self.edges.contains_key(key) || self.missing.contains(key)
    }

    /// Decode `document` into every handle registered for `key`.
    fn absorb(&mut self, key: &DocumentKey, document: &Document) -> MapperResult<()> {
        let mut targets: Vec<Box<dyn AnyEntity>> = Vec::new();
        if let Some(handle) = self.identity.get(key) {
            targets.push(handle.boxed());
        }
        if let Some(extra) = self.aliases.get(key) {
            targets.extend(extra.iter().map(|h| h.boxed()));
        }

        let mut edges = None;
        for handle in targets {
            let mut decoder = Decoder::new(&mut self.identity, key.clone());
            handle.decode_document(key, document, &mut decoder)?;
            edges.get_or_insert(decoder.edges);
        }
        self.edges.insert(key.clone(), edges.unwrap_or_default());
        Ok(())
    }

    /// Run waves until the frontier is empty.
    pub(crate) fn run(mut self, source: &dyn DocumentSource) -> MapperResult<()> {
        let mut wave = 0;
        while !self.frontier.is_empty() {
            let mut wanted = Vec::new();
            let mut queued = HashSet::new();
            for visit in &self.frontier {
                if !self.seen(&visit.key) && queued.insert(&visit.key) {
                    wanted.push(visit.key.clone());
                }
            }

            if !wanted.is_empty() {
                wave += 1;
                if wave > self.max_waves {
                    return Err(MapperError::WaveLimit(self.max_waves));
                }
                let documents = source.fetch(&wanted)?;
                debug!(
                    wave,
                    frontier = self.frontier.len(),
                    fetched = wanted.len(),
                    found = documents.iter().filter(|d| d.is_some()).count(),
                    "resolver wave"
                );
                for (key, document) in wanted.into_iter().zip(documents) {
                    match document {
                        Some(document) => self.absorb(&key, &document)?,
                        None if self.roots.contains(&key) => {
                            return Err(MapperError::NotFound(key))
                        }
                        None => {
                            self.missing.insert(key);
                        }
                    }
                }
            }

            let mut next = Vec::new();
            for visit in std::mem::take(&mut self.frontier) {
                if self.missing.contains(&visit.key) {
                    if let Some((referenced_by, field)) = visit.via {
                        self.report_dangling(visit.key, referenced_by, field);
                    }
                    continue;
                }
                if !self.expanded.insert((visit.key.clone(), visit.node)) {
                    continue;
                }
                let Some(edges) = self.edges.get(&visit.key) else {
                    continue;
                };
                for edge in edges {
                    for node in self.paths.step(visit.node, &[edge.field, edge.store_name.as_str()]) {
                        next.push(Visit {
                            key: edge.to.clone(),
                            node,
                            via: Some((visit.key.clone(), edge.store_name.clone())),
                        });
                    }
                }
            }
            self.frontier = next;
        }

        if self.dangling.is_empty() {
            Ok(())
        } else {
            Err(MapperError::PartialResolution(self.dangling))
        }
    }

    fn report_dangling(&mut self, key: DocumentKey, referenced_by: DocumentKey, field: String) {
        let dangling = DanglingReference {
            key,
            referenced_by,
            field,
        };
        if !self.dangling.contains(&dangling) {
            warn!(
                key = %dangling.key,
                referenced_by = %dangling.referenced_by,
                field = %dangling.field,
                "dangling reference"
            );
            self.dangling.push(dangling);
        }
    }
}

/// Load `roots` (fetched) and `seeds` (documents at hand) and follow `paths`
/// from all of them.
pub(crate) fn load(
    source: &dyn DocumentSource,
    paths: &LoadPaths,
    max_waves: usize,
    roots: Vec<Box<dyn AnyEntity>>,
    seeds: Vec<(Box<dyn AnyEntity>, Document)>,
) -> MapperResult<()> {
    let mut resolver = Resolver::new(paths, max_waves);
    for (handle, document) in seeds {
        resolver.seed(handle, &document)?;
    }
    for root in roots {
        resolver.add_root(root)?;
    }
    resolver.run(source)
}
