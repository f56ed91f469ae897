//! Render-pass channel maps for multilayer EXR transfers
//!
//! The service addresses passes by logical name (`depth`, `normal`, ...)
//! while a multilayer EXR names them `<view layer>.<channel>`. The map sent
//! in `channel_map` bridges the two.

use std::collections::BTreeMap;

/// A standard render pass that can be enabled on a view layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RenderPass {
    Combined,
    Depth,
    Mist,
    Normal,
    Vector,
    Shadow,
    AmbientOcclusion,
    Emission,
    Environment,
    DiffuseDirect,
    DiffuseColor,
    GlossyDirect,
    GlossyColor,
    TransmissionDirect,
    TransmissionColor,
    Position,
    VolumeDirect,
}

impl RenderPass {
    /// Every known pass
    pub const ALL: [RenderPass; 17] = [
        RenderPass::Combined,
        RenderPass::Depth,
        RenderPass::Mist,
        RenderPass::Normal,
        RenderPass::Vector,
        RenderPass::Shadow,
        RenderPass::AmbientOcclusion,
        RenderPass::Emission,
        RenderPass::Environment,
        RenderPass::DiffuseDirect,
        RenderPass::DiffuseColor,
        RenderPass::GlossyDirect,
        RenderPass::GlossyColor,
        RenderPass::TransmissionDirect,
        RenderPass::TransmissionColor,
        RenderPass::Position,
        RenderPass::VolumeDirect,
    ];

    /// Name the service uses for this pass
    pub fn logical_name(&self) -> &'static str {
        match self {
            RenderPass::Combined => "combined",
            RenderPass::Depth => "depth",
            RenderPass::Mist => "mist",
            RenderPass::Normal => "normal",
            RenderPass::Vector => "vector",
            RenderPass::Shadow => "shadow",
            RenderPass::AmbientOcclusion => "ambient_occlusion",
            RenderPass::Emission => "emission",
            RenderPass::Environment => "environment",
            RenderPass::DiffuseDirect => "diffuse_direct",
            RenderPass::DiffuseColor => "diffuse_color",
            RenderPass::GlossyDirect => "glossy_direct",
            RenderPass::GlossyColor => "glossy_color",
            RenderPass::TransmissionDirect => "transmission_direct",
            RenderPass::TransmissionColor => "transmission_color",
            RenderPass::Position => "position",
            RenderPass::VolumeDirect => "volume_direct",
        }
    }

    /// Channel base name as written into a multilayer EXR
    pub fn layer_channel(&self) -> &'static str {
        match self {
            RenderPass::Combined => "Combined",
            RenderPass::Depth => "Depth",
            RenderPass::Mist => "Mist",
            RenderPass::Normal => "Normal",
            RenderPass::Vector => "Vector",
            RenderPass::Shadow => "Shadow",
            RenderPass::AmbientOcclusion => "AO",
            RenderPass::Emission => "Emit",
            RenderPass::Environment => "Env",
            RenderPass::DiffuseDirect => "DiffDir",
            RenderPass::DiffuseColor => "DiffCol",
            RenderPass::GlossyDirect => "GlossDir",
            RenderPass::GlossyColor => "GlossCol",
            RenderPass::TransmissionDirect => "TransDir",
            RenderPass::TransmissionColor => "Transp",
            RenderPass::Position => "Position",
            RenderPass::VolumeDirect => "VolumeDir",
        }
    }

    /// Look a pass up by its logical name
    pub fn from_logical_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|p| p.logical_name() == name)
    }
}

/// Builds the `channel_map` for one view layer
#[derive(Debug, Clone)]
pub struct ChannelMapBuilder {
    layer: String,
    map: BTreeMap<String, String>,
}

impl ChannelMapBuilder {
    /// Start a map for the given view layer name
    pub fn new(layer: impl Into<String>) -> Self {
        Self {
            layer: layer.into(),
            map: BTreeMap::new(),
        }
    }

    /// Add an enabled render pass
    pub fn pass(mut self, pass: RenderPass) -> Self {
        self.map.insert(
            pass.logical_name().to_string(),
            format!("{}.{}", self.layer, pass.layer_channel()),
        );
        self
    }

    /// Add several enabled render passes
    pub fn passes(self, passes: impl IntoIterator<Item = RenderPass>) -> Self {
        passes.into_iter().fold(self, Self::pass)
    }

    /// Add an active custom AOV
    pub fn aov(mut self, name: &str) -> Self {
        let logical = name.to_lowercase().replace(' ', "_");
        self.map.insert(logical, format!("{}.{}", self.layer, name));
        self
    }

    /// Finish the map
    pub fn build(self) -> BTreeMap<String, String> {
        tracing::debug!(layer = %self.layer, channels = self.map.len(), "Built channel map");
        self.map
    }
}
