use std::collections::HashMap;
use std::rc::Rc;

use web_sys::WebGlRenderingContext as Gl;

use crate::error::RenderError;

/// Anything owning GPU objects that must survive context recreation: `load`
/// rebinds against the supplied (possibly brand new) context, `release`
/// drops the GPU side but keeps enough around to reload, `destroy` is
/// terminal.
pub trait GpuResource {
    fn load(&self, gl: &Gl) -> Result<(), RenderError>;
    fn release(&self);
    fn destroy(&self);
    fn loaded(&self) -> bool;
}

/// Name-keyed set of GPU resources owned by a view, released and reloaded as
/// a group when the context is recreated or the view is suspended.
pub struct ResourceRegistry {
    resources: Option<HashMap<String, Rc<dyn GpuResource>>>,
}

impl ResourceRegistry {
    pub fn new() -> ResourceRegistry {
        ResourceRegistry {
            resources: Some(HashMap::new()),
        }
    }

    pub fn count(&self) -> usize {
        self.resources.as_ref().map_or(0, HashMap::len)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.resources
            .as_ref()
            .is_some_and(|resources| resources.contains_key(name))
    }

    pub fn add(&mut self, name: &str, resource: Rc<dyn GpuResource>) -> Result<(), RenderError> {
        let Some(resources) = &mut self.resources else {
            return Err(RenderError::Destroyed);
        };
        if resources.contains_key(name) {
            return Err(RenderError::DuplicateName(name.to_string()));
        }
        resources.insert(name.to_string(), resource);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Rc<dyn GpuResource>> {
        self.resources
            .as_ref()
            .and_then(|resources| resources.get(name).cloned())
    }

    pub fn get_and_remove(&mut self, name: &str) -> Option<Rc<dyn GpuResource>> {
        self.resources
            .as_mut()
            .and_then(|resources| resources.remove(name))
    }

    pub fn loaded(&self) -> bool {
        match &self.resources {
            Some(resources) => {
                !resources.is_empty() && resources.values().all(|resource| resource.loaded())
            }
            None => false,
        }
    }

    // A member failure aborts the remaining iteration on purpose: resource
    // errors are fatal to the owning view, there is nothing to roll back.
    pub fn load(&self, gl: &Gl) -> Result<(), RenderError> {
        if let Some(resources) = &self.resources {
            for resource in resources.values() {
                resource.load(gl)?;
            }
        }
        Ok(())
    }

    pub fn release(&self) {
        if let Some(resources) = &self.resources {
            for resource in resources.values() {
                resource.release();
            }
        }
    }

    pub fn destroy(&mut self) {
        if let Some(resources) = self.resources.take() {
            for resource in resources.into_values() {
                resource.destroy();
            }
        }
    }
}

impl Default for ResourceRegistry {
    fn default() -> ResourceRegistry {
        ResourceRegistry::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    struct FakeResource {
        loaded: Cell<bool>,
        released: Cell<u32>,
        destroyed: Cell<bool>,
    }

    impl FakeResource {
        fn new(loaded: bool) -> Rc<FakeResource> {
            Rc::new(FakeResource {
                loaded: Cell::new(loaded),
                released: Cell::new(0),
                destroyed: Cell::new(false),
            })
        }
    }

    impl GpuResource for FakeResource {
        fn load(&self, _gl: &Gl) -> Result<(), RenderError> {
            self.loaded.set(true);
            Ok(())
        }

        fn release(&self) {
            self.loaded.set(false);
            self.released.set(self.released.get() + 1);
        }

        fn destroy(&self) {
            self.release();
            self.destroyed.set(true);
        }

        fn loaded(&self) -> bool {
            self.loaded.get()
        }
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let mut registry = ResourceRegistry::new();
        registry.add("sheet", FakeResource::new(true)).unwrap();
        match registry.add("sheet", FakeResource::new(true)) {
            Err(RenderError::DuplicateName(name)) => assert_eq!(name, "sheet"),
            other => panic!("expected DuplicateName, got {:?}", other.map(|_| ())),
        }
        assert_eq!(registry.count(), 1);
    }

    #[test]
    fn get_after_get_and_remove_misses() {
        let mut registry = ResourceRegistry::new();
        registry.add("sheet", FakeResource::new(true)).unwrap();
        assert!(registry.get("sheet").is_some());
        assert!(registry.get_and_remove("sheet").is_some());
        assert!(registry.get("sheet").is_none());
        assert!(registry.get_and_remove("sheet").is_none());
        assert_eq!(registry.count(), 0);
    }

    #[test]
    fn loaded_requires_every_member_and_at_least_one() {
        let mut registry = ResourceRegistry::new();
        assert!(!registry.loaded());

        let ready = FakeResource::new(true);
        let pending = FakeResource::new(false);
        registry.add("ready", ready).unwrap();
        assert!(registry.loaded());
        registry.add("pending", pending.clone()).unwrap();
        assert!(!registry.loaded());

        pending.loaded.set(true);
        assert!(registry.loaded());
    }

    #[test]
    fn release_reaches_every_member() {
        let mut registry = ResourceRegistry::new();
        let first = FakeResource::new(true);
        let second = FakeResource::new(true);
        registry.add("first", first.clone()).unwrap();
        registry.add("second", second.clone()).unwrap();

        registry.release();
        assert_eq!(first.released.get(), 1);
        assert_eq!(second.released.get(), 1);
        assert!(!registry.loaded());
    }

    #[test]
    fn destroy_is_terminal_and_idempotent() {
        let mut registry = ResourceRegistry::new();
        let resource = FakeResource::new(true);
        registry.add("sheet", resource.clone()).unwrap();

        registry.destroy();
        assert!(resource.destroyed.get());
        assert_eq!(registry.count(), 0);
        assert!(!registry.loaded());
        assert!(matches!(
            registry.add("sheet", FakeResource::new(true)),
            Err(RenderError::Destroyed)
        ));

        registry.destroy();
        assert_eq!(registry.count(), 0);
    }
}
