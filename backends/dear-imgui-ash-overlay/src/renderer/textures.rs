//! Texture id bookkeeping.

use crate::{RendererError, RendererResult};
use ash::vk;
use dear_imgui_rs::TextureId;
use std::collections::HashMap;

/// A device-local image owned by the renderer.
#[derive(Debug)]
pub(crate) struct OwnedTexture<M> {
    pub image: vk::Image,
    pub memory: M,
    pub view: vk::ImageView,
    pub descriptor_set: vk::DescriptorSet,
    pub width: u32,
    pub height: u32,
}

pub(crate) struct TextureRegistry<M> {
    textures: HashMap<u64, OwnedTexture<M>>,
    /// Caller-owned views registered with `register_texture`.
    external: HashMap<u64, vk::DescriptorSet>,
    next_id: u64,
    default_id: Option<u64>,
}

impl<M> Default for TextureRegistry<M> {
    fn default() -> Self {
        Self {
            textures: HashMap::new(),
            external: HashMap::new(),
            next_id: 1,
            default_id: None,
        }
    }
}

impl<M> TextureRegistry<M> {
    /// Next unused id. Never zero, which Dear ImGui reserves for "no texture".
    pub fn allocate_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id = self.next_id.saturating_add(1).max(1);
        id
    }

    /// Texture drawn for commands that carry the null id.
    pub fn set_default(&mut self, id: u64) {
        self.default_id = Some(id);
    }

    pub fn descriptor_set(&self, texture_id: TextureId) -> RendererResult<vk::DescriptorSet> {
        let id = if texture_id.is_null() {
            self.default_id.unwrap_or(0)
        } else {
            texture_id.id()
        };
        self.textures
            .get(&id)
            .map(|texture| texture.descriptor_set)
            .or_else(|| self.external.get(&id).copied())
            .ok_or(RendererError::BadTextureId(texture_id.id()))
    }

    pub fn get(&self, id: u64) -> Option<&OwnedTexture<M>> {
        self.textures.get(&id)
    }

    pub fn contains(&self, id: u64) -> bool {
        self.textures.contains_key(&id)
    }

    /// Store `texture` under `id`, returning whatever it replaces.
    pub fn insert(&mut self, id: u64, texture: OwnedTexture<M>) -> Option<OwnedTexture<M>> {
        self.textures.insert(id, texture)
    }

    pub fn remove(&mut self, id: u64) -> Option<OwnedTexture<M>> {
        self.textures.remove(&id)
    }

    pub fn insert_external(&mut self, set: vk::DescriptorSet) -> TextureId {
        let id = self.allocate_id();
        self.external.insert(id, set);
        TextureId::from(id)
    }

    pub fn remove_external(&mut self, texture_id: TextureId) -> Option<vk::DescriptorSet> {
        self.external.remove(&texture_id.id())
    }

    /// Remove every texture and external registration.
    pub fn drain(&mut self) -> (Vec<OwnedTexture<M>>, Vec<vk::DescriptorSet>) {
        self.default_id = None;
        (
            self.textures.drain().map(|(_, texture)| texture).collect(),
            self.external.drain().map(|(_, set)| set).collect(),
        )
    }
}
