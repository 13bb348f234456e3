//! Uniform values and their byte layout.
//!
//! Programs declare their uniforms up front as `(name, kind)` pairs. The order
//! of declaration is the order of the fields in the WGSL uniform struct, so
//! [`UniformLayout`] can compute the same offsets the shader compiler does.

use std::collections::HashMap;

use crate::gpu::GpuError;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum UniformKind {
    Int,
    Float,
    Vec2,
    Vec3,
    Vec4,
    Mat4,
}

impl UniformKind {
    /// (alignment, size) in the uniform address space.
    fn align_and_size(&self) -> (u32, u32) {
        match self {
            UniformKind::Int | UniformKind::Float => (4, 4),
            UniformKind::Vec2 => (8, 8),
            UniformKind::Vec3 => (16, 12),
            UniformKind::Vec4 => (16, 16),
            UniformKind::Mat4 => (16, 64),
        }
    }
}

/// A single uniform value. Matrices are column-major.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum UniformValue {
    Int(i32),
    Float(f32),
    Vec2([f32; 2]),
    Vec3([f32; 3]),
    Vec4([f32; 4]),
    Mat4([[f32; 4]; 4]),
}

impl UniformValue {
    pub fn kind(&self) -> UniformKind {
        match self {
            UniformValue::Int(_) => UniformKind::Int,
            UniformValue::Float(_) => UniformKind::Float,
            UniformValue::Vec2(_) => UniformKind::Vec2,
            UniformValue::Vec3(_) => UniformKind::Vec3,
            UniformValue::Vec4(_) => UniformKind::Vec4,
            UniformValue::Mat4(_) => UniformKind::Mat4,
        }
    }

    fn write(&self, out: &mut [u8]) {
        match self {
            UniformValue::Int(v) => out[..4].copy_from_slice(bytemuck::bytes_of(v)),
            UniformValue::Float(v) => out[..4].copy_from_slice(bytemuck::bytes_of(v)),
            UniformValue::Vec2(v) => out[..8].copy_from_slice(bytemuck::cast_slice(v)),
            UniformValue::Vec3(v) => out[..12].copy_from_slice(bytemuck::cast_slice(v)),
            UniformValue::Vec4(v) => out[..16].copy_from_slice(bytemuck::cast_slice(v)),
            UniformValue::Mat4(m) => out[..64].copy_from_slice(bytemuck::cast_slice(m)),
        }
    }

    pub fn as_float(&self) -> Option<f32> {
        match self {
            UniformValue::Float(v) => Some(*v),
            UniformValue::Int(v) => Some(*v as f32),
            _ => None,
        }
    }
}

impl From<i32> for UniformValue {
    fn from(v: i32) -> Self {
        UniformValue::Int(v)
    }
}

impl From<f32> for UniformValue {
    fn from(v: f32) -> Self {
        UniformValue::Float(v)
    }
}

impl From<[f32; 2]> for UniformValue {
    fn from(v: [f32; 2]) -> Self {
        UniformValue::Vec2(v)
    }
}

impl From<[f32; 3]> for UniformValue {
    fn from(v: [f32; 3]) -> Self {
        UniformValue::Vec3(v)
    }
}

impl From<[f32; 4]> for UniformValue {
    fn from(v: [f32; 4]) -> Self {
        UniformValue::Vec4(v)
    }
}

impl From<cgmath::Vector3<f32>> for UniformValue {
    fn from(v: cgmath::Vector3<f32>) -> Self {
        UniformValue::Vec3(v.into())
    }
}

impl From<cgmath::Vector4<f32>> for UniformValue {
    fn from(v: cgmath::Vector4<f32>) -> Self {
        UniformValue::Vec4(v.into())
    }
}

impl From<cgmath::Matrix4<f32>> for UniformValue {
    fn from(m: cgmath::Matrix4<f32>) -> Self {
        UniformValue::Mat4(m.into())
    }
}

#[derive(Clone, Debug, PartialEq)]
struct Field {
    kind: UniformKind,
    offset: u32,
}

/// Offsets of every declared uniform inside one uniform buffer.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct UniformLayout {
    fields: HashMap<String, Field>,
    size: u32,
}

impl UniformLayout {
    pub fn new(uniforms: &[(String, UniformKind)]) -> Self {
        let mut fields = HashMap::with_capacity(uniforms.len());
        let mut offset = 0u32;
        for (name, kind) in uniforms {
            let (align, size) = kind.align_and_size();
            offset = offset.next_multiple_of(align);
            fields.insert(name.clone(), Field { kind: *kind, offset });
            offset += size;
        }
        Self {
            fields,
            size: offset.next_multiple_of(16),
        }
    }

    /// Buffer size in bytes; zero when nothing is declared.
    pub fn size(&self) -> u32 {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn offset_of(&self, name: &str) -> Option<u32> {
        self.fields.get(name).map(|f| f.offset)
    }

    pub fn kind_of(&self, name: &str) -> Option<UniformKind> {
        self.fields.get(name).map(|f| f.kind)
    }

    /// Checks `value` against the declaration of `name`.
    pub fn check(&self, program: &str, name: &str, value: &UniformValue) -> Result<(), GpuError> {
        let field = self.fields.get(name).ok_or_else(|| GpuError::UnknownUniform {
            program: program.to_string(),
            name: name.to_string(),
        })?;
        if field.kind != value.kind() {
            return Err(GpuError::UniformType {
                name: name.to_string(),
                expected: field.kind,
                found: value.kind(),
            });
        }
        Ok(())
    }

    /// Writes `value` into `data` (which must be `size()` bytes long).
    pub fn write(
        &self,
        data: &mut [u8],
        program: &str,
        name: &str,
        value: &UniformValue,
    ) -> Result<(), GpuError> {
        self.check(program, name, value)?;
        let offset = self.fields[name].offset as usize;
        value.write(&mut data[offset..]);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layout(entries: &[(&str, UniformKind)]) -> UniformLayout {
        let owned: Vec<(String, UniformKind)> =
            entries.iter().map(|(n, k)| (n.to_string(), *k)).collect();
        UniformLayout::new(&owned)
    }

    #[test]
    fn offsets_follow_wgsl_alignment() {
        let l = layout(&[
            ("uSteps", UniformKind::Float),
            ("uColor", UniformKind::Vec3),
            ("uScale", UniformKind::Float),
            ("uTexel", UniformKind::Vec2),
            ("uModel", UniformKind::Mat4),
        ]);
        assert_eq!(l.offset_of("uSteps"), Some(0));
        assert_eq!(l.offset_of("uColor"), Some(16));
        // a scalar packs into the tail of a vec3
        assert_eq!(l.offset_of("uScale"), Some(28));
        assert_eq!(l.offset_of("uTexel"), Some(32));
        assert_eq!(l.offset_of("uModel"), Some(48));
        assert_eq!(l.size(), 112);
    }

    #[test]
    fn empty_layout_has_no_size() {
        let l = layout(&[]);
        assert!(l.is_empty());
        assert_eq!(l.size(), 0);
    }

    #[test]
    fn writes_are_type_checked() {
        let l = layout(&[("uIntensity", UniformKind::Float)]);
        let mut data = vec![0u8; l.size() as usize];
        l.write(&mut data, "p", "uIntensity", &UniformValue::Float(2.0))
            .unwrap();
        assert_eq!(&data[..4], bytemuck::bytes_of(&2.0f32));

        let err = l
            .write(&mut data, "p", "uIntensity", &UniformValue::Int(2))
            .unwrap_err();
        assert!(matches!(err, GpuError::UniformType { .. }));
        let err = l
            .write(&mut data, "p", "uMissing", &UniformValue::Float(1.0))
            .unwrap_err();
        assert!(matches!(err, GpuError::UnknownUniform { .. }));
    }
}
