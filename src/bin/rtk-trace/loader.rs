//! OBJ asset loading: turns a Wavefront file into the flat per-vertex
//! arrays the kernel's mesh description consumes.

use std::path::Path;
use thiserror::Error;

/// Errors from the asset loading shell.
#[derive(Error, Debug)]
pub enum LoadError {
    /// The OBJ parser rejected the file
    #[error("Failed to parse OBJ: {0}")]
    Obj(#[from] tobj::LoadError),

    /// A model carried no vertex positions
    #[error("Mesh '{0}' has no vertex positions")]
    EmptyMesh(String),
}

/// One loaded mesh with packed attribute streams. Normals and UVs share
/// the position indexing (single-index layout), so the streams plug
/// straight into the kernel's strided mesh description.
pub struct LoadedMesh {
    pub name: String,
    pub positions: Vec<f32>,
    pub normals: Vec<f32>,
    pub uvs: Vec<f32>,
    pub indices: Vec<u32>,
}

pub fn load_obj(path: &Path) -> Result<Vec<LoadedMesh>, LoadError> {
    let (models, _materials) = tobj::load_obj(path, &tobj::GPU_LOAD_OPTIONS)?;

    models
        .into_iter()
        .map(|model| {
            let mesh = model.mesh;
            if mesh.positions.is_empty() {
                return Err(LoadError::EmptyMesh(model.name));
            }
            Ok(LoadedMesh {
                name: model.name,
                positions: mesh.positions,
                normals: mesh.normals,
                uvs: mesh.texcoords,
                indices: mesh.indices,
            })
        })
        .collect()
}
