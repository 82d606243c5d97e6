//! Keyed caches for the render pass objects and framebuffers.

use crate::{RendererError, RendererResult};
use ash::vk;
use std::collections::HashMap;

/// Caller-chosen identity of an image view.
///
/// Framebuffers and the background descriptor set are cached per `ViewId`, so
/// a new view handed out under an old id must be announced with
/// [`OverlayRenderer::invalidate_view`](crate::OverlayRenderer::invalidate_view).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ViewId(pub u64);

/// Properties that require a new render pass and pipelines when they change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PassKey {
    pub format: vk::Format,
    pub initial_layout: vk::ImageLayout,
    pub final_layout: vk::ImageLayout,
    /// Two subpasses: full-screen background, then the GUI.
    pub with_background: bool,
}

/// Holds the objects built for the current [`PassKey`].
pub(crate) struct PassCache<T> {
    entry: Option<(PassKey, T)>,
    builds: usize,
}

impl<T> Default for PassCache<T> {
    fn default() -> Self {
        Self {
            entry: None,
            builds: 0,
        }
    }
}

impl<T> PassCache<T> {
    /// Return the objects for `key`, building them if the key changed.
    ///
    /// Before a build, the previous objects and every framebuffer made for
    /// them are handed to `destroy`. If `destroy` fails, nothing is built and
    /// the cache is left empty.
    pub fn ensure<F, B, D>(
        &mut self,
        key: PassKey,
        framebuffers: &mut FramebufferCache<F>,
        build: B,
        destroy: D,
    ) -> RendererResult<&T>
    where
        F: Copy,
        B: FnOnce(&PassKey) -> RendererResult<T>,
        D: FnOnce(Option<T>, Vec<F>) -> RendererResult<()>,
    {
        let cached = matches!(&self.entry, Some((cached_key, _)) if *cached_key == key);
        if !cached {
            let previous = self.entry.take().map(|(previous_key, value)| {
                log::debug!("render pass key changed: {previous_key:?} -> {key:?}");
                value
            });
            let stale = framebuffers.drain();
            if previous.is_some() || !stale.is_empty() {
                destroy(previous, stale)?;
            }

            let value = build(&key)?;
            self.builds += 1;
            log::debug!("built render pass objects ({} so far)", self.builds);
            let (_, value) = self.entry.insert((key, value));
            return Ok(&*value);
        }

        self.entry
            .as_ref()
            .map(|(_, value)| value)
            .ok_or_else(|| RendererError::Init("render pass cache is empty".into()))
    }

    #[cfg(test)]
    pub fn current(&self) -> Option<&T> {
        self.entry.as_ref().map(|(_, value)| value)
    }

    /// Number of times `ensure` had to build.
    #[cfg(test)]
    pub fn builds(&self) -> usize {
        self.builds
    }

    pub fn take(&mut self) -> Option<T> {
        self.entry.take().map(|(_, value)| value)
    }
}

/// Framebuffers memoised per view and size.
pub(crate) struct FramebufferCache<T> {
    framebuffers: HashMap<(ViewId, u32, u32), T>,
}

impl<T> Default for FramebufferCache<T> {
    fn default() -> Self {
        Self {
            framebuffers: HashMap::new(),
        }
    }
}

impl<T: Copy> FramebufferCache<T> {
    pub fn get_or_create<F>(
        &mut self,
        view: ViewId,
        extent: vk::Extent2D,
        create: F,
    ) -> RendererResult<T>
    where
        F: FnOnce() -> RendererResult<T>,
    {
        let key = (view, extent.width, extent.height);
        if let Some(framebuffer) = self.framebuffers.get(&key) {
            return Ok(*framebuffer);
        }
        let framebuffer = create()?;
        self.framebuffers.insert(key, framebuffer);
        Ok(framebuffer)
    }

    /// Remove every framebuffer built for `view`.
    pub fn invalidate_view(&mut self, view: ViewId) -> Vec<T> {
        let keys: Vec<_> = self
            .framebuffers
            .keys()
            .filter(|(id, _, _)| *id == view)
            .copied()
            .collect();
        keys.into_iter()
            .filter_map(|key| self.framebuffers.remove(&key))
            .collect()
    }

    pub fn drain(&mut self) -> Vec<T> {
        self.framebuffers.drain().map(|(_, framebuffer)| framebuffer).collect()
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.framebuffers.len()
    }
}
