//! Ownership ledger for GPU objects.
//!
//! Every pipeline, shader module, texture and buffer created by
//! [`GpuState`](super::GpuState) is inserted into a [`ResourceArena`] and
//! addressed through a [`ResourceId`]. Disposal walks the arena once, so each
//! object is released exactly once no matter how many times teardown runs.

/// Something the arena can release.
pub(crate) trait Release {
    fn kind(&self) -> &'static str;
    fn release(self);
}

/// GPU objects owned by the compositor.
pub(crate) enum GpuObject {
    Pipeline(wgpu::RenderPipeline),
    Shader(wgpu::ShaderModule),
    Texture(wgpu::Texture),
    Buffer(wgpu::Buffer),
}

impl Release for GpuObject {
    fn kind(&self) -> &'static str {
        match self {
            GpuObject::Pipeline(_) => "pipeline",
            GpuObject::Shader(_) => "shader",
            GpuObject::Texture(_) => "texture",
            GpuObject::Buffer(_) => "buffer",
        }
    }

    fn release(self) {
        match self {
            GpuObject::Texture(texture) => texture.destroy(),
            GpuObject::Buffer(buffer) => buffer.destroy(),
            // Pipelines and shader modules are freed when the last handle drops.
            GpuObject::Pipeline(_) | GpuObject::Shader(_) => {}
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub(crate) struct ResourceId {
    index: u32,
    generation: u32,
}

struct Slot<T> {
    generation: u32,
    value: Option<T>,
}

pub(crate) struct ResourceArena<T: Release> {
    slots: Vec<Slot<T>>,
    free: Vec<u32>,
}

impl<T: Release> Default for ResourceArena<T> {
    fn default() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
        }
    }
}

impl<T: Release> ResourceArena<T> {
    pub(crate) fn insert(&mut self, value: T) -> ResourceId {
        tracing::debug!(kind = value.kind(), "allocated GPU resource");
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.value = Some(value);
            return ResourceId {
                index,
                generation: slot.generation,
            };
        }

        let index = self.slots.len() as u32;
        self.slots.push(Slot {
            generation: 0,
            value: Some(value),
        });
        ResourceId {
            index,
            generation: 0,
        }
    }

    pub(crate) fn get(&self, id: ResourceId) -> Option<&T> {
        self.slots
            .get(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.value.as_ref())
    }

    /// Releases a single resource. Stale or repeated ids are ignored.
    pub(crate) fn release(&mut self, id: ResourceId) -> bool {
        let Some(slot) = self.slots.get_mut(id.index as usize) else {
            return false;
        };
        if slot.generation != id.generation {
            return false;
        }
        let Some(value) = slot.value.take() else {
            return false;
        };
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(id.index);
        tracing::debug!(kind = value.kind(), "released GPU resource");
        value.release();
        true
    }

    /// Releases every live resource and returns how many were released.
    pub(crate) fn dispose_all(&mut self) -> usize {
        let mut released = 0;
        for slot in self.slots.drain(..) {
            if let Some(value) = slot.value {
                value.release();
                released += 1;
            }
        }
        self.free.clear();
        released
    }

    pub(crate) fn live(&self) -> usize {
        self.slots.iter().filter(|slot| slot.value.is_some()).count()
    }
}

impl ResourceArena<GpuObject> {
    pub(crate) fn texture(&self, id: ResourceId) -> Option<&wgpu::Texture> {
        match self.get(id) {
            Some(GpuObject::Texture(texture)) => Some(texture),
            _ => None,
        }
    }

    pub(crate) fn buffer(&self, id: ResourceId) -> Option<&wgpu::Buffer> {
        match self.get(id) {
            Some(GpuObject::Buffer(buffer)) => Some(buffer),
            _ => None,
        }
    }

    pub(crate) fn pipeline(&self, id: ResourceId) -> Option<&wgpu::RenderPipeline> {
        match self.get(id) {
            Some(GpuObject::Pipeline(pipeline)) => Some(pipeline),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::rc::Rc;

    struct Probe {
        releases: Rc<Cell<u32>>,
    }

    impl Release for Probe {
        fn kind(&self) -> &'static str {
            "probe"
        }

        fn release(self) {
            self.releases.set(self.releases.get() + 1);
        }
    }

    fn probe(counter: &Rc<Cell<u32>>) -> Probe {
        Probe {
            releases: Rc::clone(counter),
        }
    }

    #[test]
    fn dispose_releases_each_resource_once() {
        let counter = Rc::new(Cell::new(0));
        let mut arena = ResourceArena::default();
        for _ in 0..5 {
            arena.insert(probe(&counter));
        }
        assert_eq!(arena.live(), 5);

        assert_eq!(arena.dispose_all(), 5);
        assert_eq!(counter.get(), 5);
        assert_eq!(arena.dispose_all(), 0);
        assert_eq!(counter.get(), 5);
        assert_eq!(arena.live(), 0);
    }

    #[test]
    fn released_ids_are_not_released_again_at_dispose() {
        let counter = Rc::new(Cell::new(0));
        let mut arena = ResourceArena::default();
        let first = arena.insert(probe(&counter));
        arena.insert(probe(&counter));

        assert!(arena.release(first));
        assert!(!arena.release(first));
        assert_eq!(counter.get(), 1);

        assert_eq!(arena.dispose_all(), 1);
        assert_eq!(counter.get(), 2);
    }

    #[test]
    fn stale_ids_do_not_resolve_after_slot_reuse() {
        let counter = Rc::new(Cell::new(0));
        let mut arena = ResourceArena::default();
        let stale = arena.insert(probe(&counter));
        arena.release(stale);
        let fresh = arena.insert(probe(&counter));

        assert!(arena.get(stale).is_none());
        assert!(arena.get(fresh).is_some());
        assert!(!arena.release(stale));
        assert_eq!(arena.live(), 1);
    }

    #[test]
    fn repeated_cycles_leak_nothing() {
        let counter = Rc::new(Cell::new(0));
        let mut arena = ResourceArena::default();
        for cycle in 1..=3u32 {
            for _ in 0..4 {
                arena.insert(probe(&counter));
            }
            arena.dispose_all();
            assert_eq!(counter.get(), cycle * 4);
            assert_eq!(arena.live(), 0);
        }
    }
}
