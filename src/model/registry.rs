//! Model registry and shared-model rendezvous
//!
//! Components address models through [`ModelHandle`]s. A slot either owns a
//! descriptor (`Local`) or points at another slot (`Reference`). Loading a
//! local slot happens on its own loader thread; loading a reference blocks
//! until the slot at the end of the reference chain is trained and then
//! shares the very same model instance.
//!
//! All slot state sits behind one mutex; completion (success or failure) is
//! broadcast with `notify_all` because any number of components may wait on
//! the same model.

use super::{Model, ModelDescriptor, Predictor};
use crate::error::{Result, SigstreamError};
use parking_lot::{Condvar, Mutex, RwLock};
use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// A model shared between components
pub type SharedModel = Arc<RwLock<Model>>;

/// Index of a registry slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ModelHandle(usize);

impl ModelHandle {
    pub fn index(&self) -> usize {
        self.0
    }
}

impl fmt::Display for ModelHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Lifecycle of a slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelState {
    Unresolved,
    DescriptorResolved,
    Loading,
    Trained,
}

impl fmt::Display for ModelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ModelState::Unresolved => "unresolved",
            ModelState::DescriptorResolved => "descriptor resolved",
            ModelState::Loading => "loading",
            ModelState::Trained => "trained",
        };
        f.write_str(name)
    }
}

/// Where a slot's descriptor comes from
#[derive(Debug, Clone)]
pub enum DescriptorSource {
    Local(Arc<ModelDescriptor>),
    /// Lookup through another slot; never owns it
    Reference(ModelHandle),
}

#[derive(Debug)]
struct Slot {
    name: String,
    state: ModelState,
    source: Option<DescriptorSource>,
    model: Option<SharedModel>,
    error: Option<String>,
    predictor: Option<Box<dyn Predictor>>,
}

#[derive(Debug, Default)]
pub struct ModelRegistry {
    slots: Mutex<Vec<Slot>>,
    ready: Condvar,
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new, unresolved slot
    pub fn create(&self, name: &str) -> Result<ModelHandle> {
        let mut slots = self.slots.lock();
        if slots.iter().any(|s| s.name == name) {
            return Err(SigstreamError::InvalidParameter {
                param: "name".to_string(),
                value: name.to_string(),
                expected: "a name not yet registered".to_string(),
            });
        }
        slots.push(Slot {
            name: name.to_string(),
            state: ModelState::Unresolved,
            source: None,
            model: None,
            error: None,
            predictor: None,
        });
        Ok(ModelHandle(slots.len() - 1))
    }

    pub fn handle(&self, name: &str) -> Option<ModelHandle> {
        self.slots
            .lock()
            .iter()
            .position(|s| s.name == name)
            .map(ModelHandle)
    }

    pub fn name(&self, handle: ModelHandle) -> Result<String> {
        Ok(slot(&self.slots.lock(), handle)?.name.clone())
    }

    pub fn state(&self, handle: ModelHandle) -> Result<ModelState> {
        Ok(slot(&self.slots.lock(), handle)?.state)
    }

    /// Last load error of the slot, if any
    pub fn last_error(&self, handle: ModelHandle) -> Result<Option<String>> {
        Ok(slot(&self.slots.lock(), handle)?.error.clone())
    }

    // ------------------------------------------------------------------------
    // Resolution
    // ------------------------------------------------------------------------

    /// Parse a descriptor file into the slot
    pub fn resolve_file(&self, handle: ModelHandle, path: &Path) -> Result<Arc<ModelDescriptor>> {
        let descriptor = ModelDescriptor::from_file(path)?;
        self.resolve_descriptor(handle, descriptor)
    }

    /// Store an already parsed descriptor in the slot
    pub fn resolve_descriptor(
        &self,
        handle: ModelHandle,
        descriptor: ModelDescriptor,
    ) -> Result<Arc<ModelDescriptor>> {
        let descriptor = Arc::new(descriptor);
        let mut slots = self.slots.lock();
        let slot = slot_mut(&mut slots, handle)?;
        check_resolvable(slot)?;
        slot.source = Some(DescriptorSource::Local(Arc::clone(&descriptor)));
        slot.state = ModelState::DescriptorResolved;
        log::debug!("[REGISTRY] '{}' resolved locally", slot.name);
        Ok(descriptor)
    }

    /// Make the slot look up its descriptor and model through `target`
    pub fn resolve_reference(&self, handle: ModelHandle, target: ModelHandle) -> Result<()> {
        let mut slots = self.slots.lock();
        slot(&slots, target)?;
        let name = slot(&slots, handle)?.name.clone();

        let mut current = target;
        loop {
            if current == handle {
                log::error!("[REGISTRY] reference from '{}' forms a cycle", name);
                return Err(SigstreamError::CyclicReference { name });
            }
            match &slot(&slots, current)?.source {
                Some(DescriptorSource::Reference(next)) => current = *next,
                _ => break,
            }
        }

        let target_name = slot(&slots, target)?.name.clone();
        let slot = slot_mut(&mut slots, handle)?;
        check_resolvable(slot)?;
        slot.source = Some(DescriptorSource::Reference(target));
        slot.state = ModelState::DescriptorResolved;
        log::debug!("[REGISTRY] '{}' references '{}'", name, target_name);
        Ok(())
    }

    /// Descriptor of the slot, delegating through references
    pub fn descriptor(&self, handle: ModelHandle) -> Result<Arc<ModelDescriptor>> {
        let slots = self.slots.lock();
        let root = root(&slots, handle)?;
        match &slots[root].source {
            Some(DescriptorSource::Local(descriptor)) => Ok(Arc::clone(descriptor)),
            _ => Err(unresolved(&slots[root].name)),
        }
    }

    /// Backend used when the slot's model kind is external
    pub fn attach_predictor(&self, handle: ModelHandle, predictor: Box<dyn Predictor>) -> Result<()> {
        let mut slots = self.slots.lock();
        slot_mut(&mut slots, handle)?.predictor = Some(predictor);
        Ok(())
    }

    /// Publish a model trained in-process and wake any waiters
    pub fn install(&self, handle: ModelHandle, model: Model) -> Result<SharedModel> {
        let shared = Arc::new(RwLock::new(model));
        let mut slots = self.slots.lock();
        let slot = slot_mut(&mut slots, handle)?;
        if let Some(DescriptorSource::Reference(_)) = slot.source {
            return Err(SigstreamError::InvalidParameter {
                param: "handle".to_string(),
                value: slot.name.clone(),
                expected: "a slot that owns its model".to_string(),
            });
        }
        slot.model = Some(Arc::clone(&shared));
        slot.state = ModelState::Trained;
        slot.error = None;
        log::info!("[REGISTRY] '{}' installed", slot.name);
        self.ready.notify_all();
        Ok(shared)
    }

    // ------------------------------------------------------------------------
    // Loading
    // ------------------------------------------------------------------------

    /// Load the slot's model
    ///
    /// A local slot starts a loader thread and returns its handle. A
    /// reference slot performs no I/O: it blocks until the referenced model
    /// is trained and then shares it. Slots already loading or trained
    /// return `None` immediately.
    pub fn load_model(self: &Arc<Self>, handle: ModelHandle) -> Result<Option<JoinHandle<()>>> {
        let mut slots = self.slots.lock();
        let slot = slot_mut(&mut slots, handle)?;
        if matches!(slot.state, ModelState::Loading | ModelState::Trained) {
            log::debug!("[REGISTRY] '{}' already {}", slot.name, slot.state);
            return Ok(None);
        }

        match slot.source.clone() {
            None => Err(unresolved(&slot.name)),
            Some(DescriptorSource::Reference(_)) => {
                slot.state = ModelState::Loading;
                let name = slot.name.clone();
                drop(slots);
                log::debug!("[REGISTRY] '{}' waiting for referenced model", name);
                match self.wait_for_model_load(handle) {
                    Ok(_) => Ok(None),
                    Err(e) => {
                        self.finish_failed(handle, e.to_string());
                        Err(e)
                    }
                }
            }
            Some(DescriptorSource::Local(descriptor)) => {
                slot.state = ModelState::Loading;
                slot.error = None;
                let predictor = slot.predictor.take();
                let name = slot.name.clone();
                drop(slots);

                log::info!("[REGISTRY] loading '{}'", name);
                let registry = Arc::clone(self);
                let spawned = thread::Builder::new()
                    .name(format!("model-loader-{}", name))
                    .spawn(move || registry.run_load(handle, &descriptor, predictor));
                match spawned {
                    Ok(join) => Ok(Some(join)),
                    Err(e) => {
                        self.finish_failed(handle, e.to_string());
                        Err(e.into())
                    }
                }
            }
        }
    }

    /// Block until the model behind `handle` is trained
    ///
    /// Any number of threads may wait at once. Returns the load error if the
    /// loader failed.
    pub fn wait_for_model_load(&self, handle: ModelHandle) -> Result<SharedModel> {
        let mut slots = self.slots.lock();
        loop {
            let root = root(&slots, handle)?;
            let target = &slots[root];
            if target.state == ModelState::Trained {
                if let Some(model) = target.model.clone() {
                    let slot = &mut slots[handle.0];
                    slot.model = Some(Arc::clone(&model));
                    slot.state = ModelState::Trained;
                    return Ok(model);
                }
            }
            if target.state != ModelState::Loading {
                if let Some(reason) = &target.error {
                    return Err(SigstreamError::LoadFailed {
                        model: target.name.clone(),
                        reason: reason.clone(),
                    });
                }
            }
            self.ready.wait(&mut slots);
        }
    }

    /// The slot's model if it has one, without blocking
    pub fn model(&self, handle: ModelHandle) -> Result<Option<SharedModel>> {
        Ok(slot(&self.slots.lock(), handle)?.model.clone())
    }

    fn run_load(
        &self,
        handle: ModelHandle,
        descriptor: &ModelDescriptor,
        predictor: Option<Box<dyn Predictor>>,
    ) {
        // A panicking loader must still release every waiter
        let loaded = panic::catch_unwind(AssertUnwindSafe(|| {
            load_from_descriptor(descriptor, predictor)
        }))
        .unwrap_or_else(|payload| {
            Err(SigstreamError::LoadFailed {
                model: descriptor.name.clone(),
                reason: format!("loader panicked: {}", panic_message(payload.as_ref())),
            })
        });
        match loaded {
            Ok(model) => {
                let mut slots = self.slots.lock();
                let slot = &mut slots[handle.0];
                slot.model = Some(Arc::new(RwLock::new(model)));
                slot.state = ModelState::Trained;
                log::info!("[REGISTRY] '{}' trained", slot.name);
                self.ready.notify_all();
            }
            Err(e) => self.finish_failed(handle, e.to_string()),
        }
    }

    fn finish_failed(&self, handle: ModelHandle, reason: String) {
        let mut slots = self.slots.lock();
        let slot = &mut slots[handle.0];
        log::error!("[REGISTRY] loading '{}' failed: {}", slot.name, reason);
        slot.state = ModelState::DescriptorResolved;
        slot.error = Some(reason);
        self.ready.notify_all();
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn load_from_descriptor(
    descriptor: &ModelDescriptor,
    predictor: Option<Box<dyn Predictor>>,
) -> Result<Model> {
    let mut model = Model::from_descriptor(descriptor);
    if let Some(predictor) = predictor {
        model.attach_predictor(predictor)?;
    }
    let option_path = descriptor.option_path();
    model.load(&descriptor.model_path(), option_path.as_deref())?;
    Ok(model)
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic")
}

fn slot(slots: &[Slot], handle: ModelHandle) -> Result<&Slot> {
    slots
        .get(handle.0)
        .ok_or(SigstreamError::UnknownHandle { handle: handle.0 })
}

fn slot_mut(slots: &mut [Slot], handle: ModelHandle) -> Result<&mut Slot> {
    slots
        .get_mut(handle.0)
        .ok_or(SigstreamError::UnknownHandle { handle: handle.0 })
}

/// Slot at the end of the reference chain starting at `handle`
fn root(slots: &[Slot], handle: ModelHandle) -> Result<usize> {
    let mut current = handle;
    for _ in 0..=slots.len() {
        match &slot(slots, current)?.source {
            Some(DescriptorSource::Reference(next)) => current = *next,
            Some(DescriptorSource::Local(_)) => return Ok(current.0),
            None => return Err(unresolved(&slots[current.0].name)),
        }
    }
    Err(SigstreamError::CyclicReference {
        name: slots[handle.0].name.clone(),
    })
}

fn check_resolvable(slot: &Slot) -> Result<()> {
    if matches!(slot.state, ModelState::Loading | ModelState::Trained) {
        return Err(SigstreamError::InvalidParameter {
            param: "descriptor".to_string(),
            value: slot.name.clone(),
            expected: format!("a slot not yet loaded (is {})", slot.state),
        });
    }
    Ok(())
}

fn unresolved(name: &str) -> SigstreamError {
    SigstreamError::InvalidParameter {
        param: "descriptor".to_string(),
        value: name.to_string(),
        expected: "a resolved descriptor".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ModelKind, DESCRIPTOR_VERSION};
    use crate::stream::{SampleType, StreamShape};
    use std::fs;
    use std::time::Duration;
    use tempfile::TempDir;

    fn write_model(dir: &Path) -> std::path::PathBuf {
        let mut model = Model::new(ModelKind::OnlineNaiveBayes);
        model.setup(vec!["a".into(), "b".into()], 8, 1, 10.0, SampleType::Double);
        model.train(&[0.0], "a").unwrap();
        model.train(&[1.0], "b").unwrap();
        model.save(dir, "shared").unwrap()
    }

    #[test]
    fn test_reference_shares_instance() {
        let dir = TempDir::new().unwrap();
        let path = write_model(dir.path());

        let registry = Arc::new(ModelRegistry::new());
        let a = registry.create("a").unwrap();
        let b = registry.create("b").unwrap();
        registry.resolve_file(a, &path).unwrap();
        registry.resolve_reference(b, a).unwrap();
        assert_eq!(registry.descriptor(b).unwrap().name, "shared");

        let waiter = {
            let registry = Arc::clone(&registry);
            thread::spawn(move || registry.load_model(b).map(|j| j.is_none()))
        };
        while registry.state(b).unwrap() != ModelState::Loading {
            thread::sleep(Duration::from_millis(1));
        }
        assert!(registry.model(b).unwrap().is_none());

        registry.load_model(a).unwrap().unwrap().join().unwrap();
        assert!(waiter.join().unwrap().unwrap());

        let model_a = registry.model(a).unwrap().unwrap();
        let model_b = registry.model(b).unwrap().unwrap();
        assert!(Arc::ptr_eq(&model_a, &model_b));
        assert!(model_b.read().is_trained());
        assert_eq!(registry.state(b).unwrap(), ModelState::Trained);
    }

    #[test]
    fn test_failed_load_wakes_waiters() {
        let dir = TempDir::new().unwrap();
        let path = write_model(dir.path());
        fs::remove_file(dir.path().join("shared.OnlineNaiveBayes.model")).unwrap();

        let registry = Arc::new(ModelRegistry::new());
        let a = registry.create("a").unwrap();
        registry.resolve_file(a, &path).unwrap();
        registry.load_model(a).unwrap().unwrap().join().unwrap();

        assert!(matches!(
            registry.wait_for_model_load(a),
            Err(SigstreamError::LoadFailed { .. })
        ));
        assert_eq!(registry.state(a).unwrap(), ModelState::DescriptorResolved);
        assert!(registry.last_error(a).unwrap().is_some());
    }

    #[test]
    fn test_cycles_and_unresolved() {
        let registry = ModelRegistry::new();
        let a = registry.create("a").unwrap();
        let b = registry.create("b").unwrap();
        assert!(registry.create("a").is_err());
        assert!(registry.descriptor(a).is_err());

        registry.resolve_reference(b, a).unwrap();
        assert!(matches!(
            registry.resolve_reference(a, b),
            Err(SigstreamError::CyclicReference { .. })
        ));
        assert!(matches!(
            registry.resolve_reference(a, a),
            Err(SigstreamError::CyclicReference { .. })
        ));
        assert!(matches!(
            registry.state(ModelHandle(9)),
            Err(SigstreamError::UnknownHandle { handle: 9 })
        ));
        assert_eq!(registry.handle("b"), Some(b));
    }

    #[test]
    fn test_install_releases_waiters() {
        let registry = Arc::new(ModelRegistry::new());
        let trainer = registry.create("trainer").unwrap();
        let classifier = registry.create("classifier").unwrap();
        let descriptor = ModelDescriptor {
            name: "inline".to_string(),
            path: None,
            version: DESCRIPTOR_VERSION,
            trained: false,
            date: None,
            streams: vec![StreamShape::new(1, 1, 10.0, SampleType::Double)],
            classes: vec!["a".into()],
            selection: None,
            kind: ModelKind::OnlineNaiveBayes,
            model_file: "inline.model".to_string(),
            option_file: None,
        };
        registry.resolve_descriptor(trainer, descriptor).unwrap();
        registry.resolve_reference(classifier, trainer).unwrap();

        let waiter = {
            let registry = Arc::clone(&registry);
            thread::spawn(move || registry.wait_for_model_load(classifier))
        };
        let mut model = Model::new(ModelKind::OnlineNaiveBayes);
        model.setup(vec!["a".into()], 8, 1, 10.0, SampleType::Double);
        model.train(&[0.5], "a").unwrap();
        let installed = registry.install(trainer, model).unwrap();

        let shared = waiter.join().unwrap().unwrap();
        assert!(Arc::ptr_eq(&installed, &shared));
    }

    #[derive(Debug)]
    struct PanickingPredictor;

    impl Predictor for PanickingPredictor {
        fn load(&mut self, _path: &Path) -> Result<()> {
            panic!("corrupt weights");
        }

        fn predict(&self, _features: &[f64]) -> Result<Vec<f64>> {
            Ok(vec![1.0])
        }
    }

    #[test]
    fn test_panicking_loader_releases_waiters() {
        let registry = Arc::new(ModelRegistry::new());
        let owner = registry.create("owner").unwrap();
        let follower = registry.create("follower").unwrap();
        let descriptor = ModelDescriptor {
            name: "external".to_string(),
            path: None,
            version: DESCRIPTOR_VERSION,
            trained: true,
            date: None,
            streams: vec![StreamShape::new(1, 1, 10.0, SampleType::Double)],
            classes: vec!["a".into()],
            selection: None,
            kind: ModelKind::External,
            model_file: "external.bin".to_string(),
            option_file: None,
        };
        registry.resolve_descriptor(owner, descriptor).unwrap();
        registry.resolve_reference(follower, owner).unwrap();
        registry
            .attach_predictor(owner, Box::new(PanickingPredictor))
            .unwrap();

        let waiter = {
            let registry = Arc::clone(&registry);
            thread::spawn(move || registry.load_model(follower))
        };
        while registry.state(follower).unwrap() != ModelState::Loading {
            thread::sleep(Duration::from_millis(1));
        }
        let loader = registry.load_model(owner).unwrap().unwrap();
        assert!(loader.join().is_ok());

        assert!(matches!(
            waiter.join().unwrap(),
            Err(SigstreamError::LoadFailed { .. })
        ));
        assert_eq!(registry.state(owner).unwrap(), ModelState::DescriptorResolved);
        assert!(registry
            .last_error(owner)
            .unwrap()
            .is_some_and(|e| e.contains("corrupt weights")));
    }

    #[test]
    fn test_malformed_parameter_file_fails_load() {
        let dir = TempDir::new().unwrap();
        let path = write_model(dir.path());
        fs::write(dir.path().join("shared.OnlineNaiveBayes.model"), "1e19\t1\n").unwrap();

        let registry = Arc::new(ModelRegistry::new());
        let handle = registry.create("m").unwrap();
        registry.resolve_file(handle, &path).unwrap();
        registry.load_model(handle).unwrap().unwrap().join().unwrap();

        assert!(matches!(
            registry.wait_for_model_load(handle),
            Err(SigstreamError::LoadFailed { .. })
        ));
        assert_eq!(registry.state(handle).unwrap(), ModelState::DescriptorResolved);
    }
}
