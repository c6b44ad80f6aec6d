//! Purpose: Process-wide decoder registry: lookup, singleflight generation, recursion guard.
//! Exports: `DecoderCache`.
//! Role: The only mutator of shared decoder state; ties extensions, normalization,
//! mode selection, planning, and compilation together.
//! Invariants: At most one generation pass per key across all threads.
//! Invariants: The registry and key-decoder registry grow monotonically; no eviction.
//! Invariants: A placeholder published under a key is replaced or removed before the
//! generation lock is released; failed generations are never cached.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Condvar, Mutex, PoisonError, RwLock};
use std::time::Duration;

use serde_json::Value;
use tracing::{debug, info, warn};

use crate::core::artifact::ArtifactStore;
use crate::core::config::{Config, ResolutionMode};
use crate::core::emit::{self, Decoder};
use crate::core::error::{Error, ErrorKind};
use crate::core::extension::Extension;
use crate::core::normalize::{self, KeyDecoderRegistry, ResolvedType};
use crate::core::plan::Plan;
use crate::core::schema::SchemaRegistry;
use crate::core::types::{TypeDescriptor, TypeShape};
use crate::json::stream::TokenStream;

/// Bounded wait for a placeholder to be replaced by the real decoder. Exhaustion
/// signals a generation path that failed to publish, not bad input.
const PLACEHOLDER_WAIT_RETRIES: u32 = 20;
const PLACEHOLDER_WAIT_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Clone, Copy, Eq, PartialEq)]
enum GenPolicy {
    /// Normal lazy resolution per the configured mode.
    Generate,
    /// Preload: compile stored plans only, never emit fresh ones.
    ArtifactsOnly,
}

enum CellState {
    Pending,
    Ready(Arc<dyn Decoder>),
    Failed(String),
}

struct PlaceholderCell {
    state: Mutex<CellState>,
    ready: Condvar,
}

impl PlaceholderCell {
    fn new() -> Self {
        Self {
            state: Mutex::new(CellState::Pending),
            ready: Condvar::new(),
        }
    }

    fn publish(&self, decoder: Arc<dyn Decoder>) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        *state = CellState::Ready(decoder);
        self.ready.notify_all();
    }

    fn fail(&self, message: String) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        *state = CellState::Failed(message);
        self.ready.notify_all();
    }

    fn await_real(&self, key: &str) -> Result<Arc<dyn Decoder>, Error> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let mut retries = 0;
        loop {
            match &*state {
                CellState::Ready(decoder) => return Ok(decoder.clone()),
                CellState::Failed(message) => {
                    return Err(Error::new(ErrorKind::Generation)
                        .with_message(format!("decoder generation failed: {message}"))
                        .with_key(key));
                }
                CellState::Pending => {
                    if retries >= PLACEHOLDER_WAIT_RETRIES {
                        return Err(Error::new(ErrorKind::Internal)
                            .with_message("placeholder was never replaced with a real decoder")
                            .with_key(key));
                    }
                    retries += 1;
                    let (next, _timed_out) = self
                        .ready
                        .wait_timeout(state, PLACEHOLDER_WAIT_INTERVAL)
                        .unwrap_or_else(PoisonError::into_inner);
                    state = next;
                }
            }
        }
    }
}

/// Transient sentinel published under a key before its real decoder exists.
/// Breaks recursive type graphs: a recursive sub-resolution for the same key
/// sees this entry through `get` instead of re-entering generation.
struct PlaceholderDecoder {
    key: String,
    cell: Arc<PlaceholderCell>,
}

impl Decoder for PlaceholderDecoder {
    fn decode(&self, stream: &mut TokenStream<'_>) -> Result<Value, Error> {
        let real = self.cell.await_real(&self.key)?;
        real.decode(stream)
    }

    fn is_placeholder(&self) -> bool {
        true
    }
}

/// Process-wide decoder registry. Initialization is explicit and the state is
/// reached only through `get`/`resolve`; there is no teardown.
pub struct DecoderCache {
    config: Config,
    schemas: SchemaRegistry,
    extensions: Vec<Arc<dyn Extension>>,
    artifacts: Option<Arc<dyn ArtifactStore>>,
    registry: RwLock<HashMap<String, Arc<dyn Decoder>>>,
    key_decoders: KeyDecoderRegistry,
    gen_lock: Mutex<()>,
}

impl DecoderCache {
    pub fn new(config: Config, schemas: SchemaRegistry) -> Self {
        Self {
            config,
            schemas,
            extensions: Vec::new(),
            artifacts: None,
            registry: RwLock::new(HashMap::new()),
            key_decoders: KeyDecoderRegistry::new(),
            gen_lock: Mutex::new(()),
        }
    }

    pub fn with_extension(mut self, extension: impl Extension + 'static) -> Self {
        self.extensions.push(Arc::new(extension));
        self
    }

    pub fn with_artifacts(mut self, store: impl ArtifactStore + 'static) -> Self {
        self.artifacts = Some(Arc::new(store));
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Number of published decoders, placeholders included.
    pub fn len(&self) -> usize {
        self.registry
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Read-mostly lookup; safe for unsynchronized concurrent readers.
    pub fn get(&self, key: &str) -> Option<Arc<dyn Decoder>> {
        self.registry
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    /// Resolves the decoder for `descriptor`, generating it on first use.
    pub fn resolve(&self, descriptor: &TypeDescriptor) -> Result<Arc<dyn Decoder>, Error> {
        let key = descriptor.cache_key();
        // A placeholder on the fast path means generation is in flight on
        // another thread; fall through and wait for the real decoder so every
        // caller receives the identical instance.
        if let Some(decoder) = self.get(&key) {
            if !decoder.is_placeholder() {
                return Ok(decoder);
            }
        }
        let _generation = self.gen_lock.lock().unwrap_or_else(PoisonError::into_inner);
        self.resolve_under_lock(&key, descriptor, GenPolicy::Generate)
    }

    pub fn resolve_expr(&self, expr: &str) -> Result<Arc<dyn Decoder>, Error> {
        self.resolve(&TypeDescriptor::parse(expr)?)
    }

    pub fn decode_slice(
        &self,
        descriptor: &TypeDescriptor,
        input: &[u8],
    ) -> Result<Value, Error> {
        let decoder = self.resolve(descriptor)?;
        let mut stream = TokenStream::new(input);
        let value = decoder.decode(&mut stream)?;
        stream.expect_end()?;
        Ok(value)
    }

    pub fn decode_str(&self, descriptor: &TypeDescriptor, input: &str) -> Result<Value, Error> {
        self.decode_slice(descriptor, input.as_bytes())
    }

    /// Emits the specialization plan for a type without publishing a decoder.
    pub fn plan_for(&self, descriptor: &TypeDescriptor) -> Result<Plan, Error> {
        let _generation = self.gen_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let resolved = self.normalize(descriptor)?;
        if resolved.shape == TypeShape::Scalar {
            return Err(Error::new(ErrorKind::Usage)
                .with_message("native types have no specialization plan")
                .with_type_expr(descriptor.to_string()));
        }
        emit::emit_plan(&resolved, &self.config, &self.schemas)
    }

    /// Offline export step: persists plans for every reachable non-native type.
    pub fn export(
        &self,
        roots: &[TypeDescriptor],
        store: &dyn ArtifactStore,
    ) -> Result<Vec<String>, Error> {
        let _generation = self.gen_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut pending: VecDeque<TypeDescriptor> = roots.iter().cloned().collect();
        let mut seen: HashSet<String> = HashSet::new();
        let mut exported = Vec::new();
        while let Some(descriptor) = pending.pop_front() {
            let key = descriptor.cache_key();
            if !seen.insert(key.clone()) {
                continue;
            }
            let resolved = self.normalize(&descriptor)?;
            if resolved.shape == TypeShape::Scalar {
                continue;
            }
            let plan = emit::emit_plan(&resolved, &self.config, &self.schemas)?;
            for reference in plan.references() {
                if !seen.contains(reference) {
                    pending.push_back(TypeDescriptor::parse(reference)?);
                }
            }
            store.store(&key, &plan)?;
            debug!(key, "exported decoding plan");
            exported.push(key);
        }
        Ok(exported)
    }

    /// Compiles every stored plan into the registry; the population step for
    /// ahead-of-time processes.
    pub fn preload_artifacts(&self) -> Result<usize, Error> {
        let store = self
            .artifacts
            .clone()
            .ok_or_else(|| {
                Error::new(ErrorKind::Usage)
                    .with_message("no artifact store configured")
                    .with_hint("Attach a store with `with_artifacts` before preloading.")
            })?;
        let keys = store.keys()?;
        let _generation = self.gen_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut loaded = 0;
        for key in keys {
            if self.get(&key).is_some() {
                continue;
            }
            let descriptor = TypeDescriptor::parse(&key)?;
            self.resolve_under_lock(&key, &descriptor, GenPolicy::ArtifactsOnly)?;
            loaded += 1;
        }
        Ok(loaded)
    }

    fn normalize(&self, descriptor: &TypeDescriptor) -> Result<ResolvedType, Error> {
        normalize::normalize(descriptor, &self.config, &self.schemas, &self.key_decoders)
    }

    fn publish(&self, key: &str, decoder: Arc<dyn Decoder>) {
        self.registry
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_string(), decoder);
    }

    fn remove(&self, key: &str) {
        self.registry
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key);
    }

    fn resolve_under_lock(
        &self,
        key: &str,
        descriptor: &TypeDescriptor,
        policy: GenPolicy,
    ) -> Result<Arc<dyn Decoder>, Error> {
        // Double-checked re-read: a contending thread may have published while
        // we waited for the lock, and a recursive sub-resolution for this exact
        // key must observe the placeholder instead of generating again.
        if let Some(decoder) = self.get(key) {
            return Ok(decoder);
        }

        let mut requested = descriptor.clone();
        if policy == GenPolicy::Generate {
            if self.config.mode() == ResolutionMode::AheadOfTime {
                return Err(Error::new(ErrorKind::Unresolved)
                    .with_message("no preloaded decoder for key")
                    .with_key(key)
                    .with_hint(
                        "Export artifacts and call preload_artifacts before serving in \
                         ahead-of-time mode.",
                    ));
            }
            for extension in &self.extensions {
                if let Some(rewritten) = extension.rewrite(&requested) {
                    requested = rewritten;
                }
                if let Some(decoder) = extension.provide(key, &requested) {
                    debug!(key, "decoder supplied by extension");
                    self.publish(key, decoder.clone());
                    return Ok(decoder);
                }
            }
        }

        let resolved = self.normalize(&requested)?;

        if let Some(native) = emit::native_decoder(resolved.descriptor.raw()) {
            self.publish(key, native.clone());
            return Ok(native);
        }

        let cell = Arc::new(PlaceholderCell::new());
        let placeholder: Arc<dyn Decoder> = Arc::new(PlaceholderDecoder {
            key: key.to_string(),
            cell: cell.clone(),
        });
        self.publish(key, placeholder);

        match self.build_under_lock(key, &resolved, policy) {
            Ok(decoder) => {
                self.publish(key, decoder.clone());
                cell.publish(decoder.clone());
                Ok(decoder)
            }
            Err(err) => {
                // Retry-eligible failure: drop the placeholder and hand concurrent
                // waiters the original cause instead of a timeout.
                self.remove(key);
                let err = match err.kind() {
                    ErrorKind::Generation | ErrorKind::Unresolved => err,
                    _ => Error::new(ErrorKind::Generation)
                        .with_message("decoder generation failed")
                        .with_key(key)
                        .with_type_expr(resolved.descriptor.to_string())
                        .with_source(err),
                };
                cell.fail(err.to_string());
                Err(err)
            }
        }
    }

    fn build_under_lock(
        &self,
        key: &str,
        resolved: &ResolvedType,
        policy: GenPolicy,
    ) -> Result<Arc<dyn Decoder>, Error> {
        match policy {
            GenPolicy::ArtifactsOnly => {
                let store = self.artifacts.as_ref().ok_or_else(|| {
                    Error::new(ErrorKind::Internal)
                        .with_message("artifact-only resolution without a store")
                })?;
                match store.load(key)? {
                    Some(plan) => self.compile_under_lock(&plan, policy),
                    None => Err(Error::new(ErrorKind::Unresolved)
                        .with_message("no exported artifact for key")
                        .with_key(key)),
                }
            }
            GenPolicy::Generate => match self.config.mode() {
                ResolutionMode::Reflective => {
                    debug!(key, "building reflective decoder");
                    emit::reflective_decoder(
                        resolved,
                        &self.schemas,
                        &self.key_decoders,
                        &mut |ref_key| self.resolve_ref_under_lock(ref_key, policy),
                    )
                }
                ResolutionMode::Hybrid => {
                    if let Some(store) = &self.artifacts {
                        match store.load(key) {
                            Ok(Some(plan)) => match self.compile_under_lock(&plan, policy) {
                                Ok(decoder) => {
                                    debug!(key, "decoder loaded from exported artifact");
                                    return Ok(decoder);
                                }
                                Err(err) => {
                                    warn!(key, error = %err, "ignoring uncompilable artifact");
                                }
                            },
                            Ok(None) => {}
                            Err(err) => {
                                warn!(key, error = %err, "ignoring unreadable artifact");
                            }
                        }
                    }
                    let plan = emit::emit_plan(resolved, &self.config, &self.schemas)?;
                    if self.config.dump_plans() {
                        info!(
                            target: "castite::plan",
                            key,
                            plan = %plan.render_json(),
                            "emitted decoding plan"
                        );
                    }
                    debug!(key, "compiling emitted plan");
                    self.compile_under_lock(&plan, policy)
                        .map_err(|err| err.with_plan(plan.render_json()))
                }
                ResolutionMode::AheadOfTime => Err(Error::new(ErrorKind::Internal)
                    .with_message("generation attempted in ahead-of-time mode")
                    .with_key(key)),
            },
        }
    }

    fn compile_under_lock(
        &self,
        plan: &Plan,
        policy: GenPolicy,
    ) -> Result<Arc<dyn Decoder>, Error> {
        emit::compile_plan(plan, &self.key_decoders, &mut |ref_key| {
            self.resolve_ref_under_lock(ref_key, policy)
        })
    }

    fn resolve_ref_under_lock(
        &self,
        key: &str,
        policy: GenPolicy,
    ) -> Result<Arc<dyn Decoder>, Error> {
        if let Some(decoder) = self.get(key) {
            return Ok(decoder);
        }
        let descriptor = TypeDescriptor::parse(key)
            .map_err(|err| err.with_message(format!("plan references invalid key `{key}`")))?;
        self.resolve_under_lock(key, &descriptor, policy)
    }
}
