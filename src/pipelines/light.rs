//! Light payloads and their upload to the lighting program.

use cgmath::{InnerSpace, Matrix4, Vector3, Vector4};

use crate::{
    gpu::{GpuDevice, GpuError},
    pipelines::program::ShaderProgram,
};

/// Point lights the lighting program can take at once.
pub const MAX_POINT_LIGHTS: usize = 4;

/// Light arriving from infinitely far away.
///
/// `direction` points from the surface toward the light.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct DirLight {
    pub direction: Vector3<f32>,
    pub color: Vector3<f32>,
    pub intensity: f32,
}

/// Light at a point, fading with `intensity / distance`.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct PointLight {
    pub position: Vector3<f32>,
    pub color: Vector3<f32>,
    pub intensity: f32,
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub enum Light {
    Directional(DirLight),
    Point(PointLight),
}

impl Light {
    /// The light as seen from world space when its node resolves to `world`.
    pub fn in_world(&self, world: &Matrix4<f32>) -> Light {
        match *self {
            Light::Directional(dir) => {
                let d = world * dir.direction.extend(0.0);
                Light::Directional(DirLight {
                    direction: d.truncate().normalize(),
                    ..dir
                })
            }
            Light::Point(point) => {
                let p: Vector4<f32> = world * point.position.extend(1.0);
                Light::Point(PointLight {
                    position: p.truncate(),
                    ..point
                })
            }
        }
    }
}

/// The lights of one frame, ready to be written into a lighting program.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct LightSet {
    pub directional: Option<DirLight>,
    pub points: Vec<PointLight>,
}

impl LightSet {
    /// Collects world-space lights. The first directional light wins and
    /// point lights past [`MAX_POINT_LIGHTS`] are dropped.
    pub fn collect<'a>(lights: impl IntoIterator<Item = (&'a Light, Matrix4<f32>)>) -> Self {
        let mut set = LightSet::default();
        for (light, world) in lights {
            match light.in_world(&world) {
                Light::Directional(dir) => {
                    if set.directional.is_none() {
                        set.directional = Some(dir);
                    }
                }
                Light::Point(point) => {
                    if set.points.len() < MAX_POINT_LIGHTS {
                        set.points.push(point);
                    } else {
                        log::debug!("more than {MAX_POINT_LIGHTS} point lights, ignoring the rest");
                    }
                }
            }
        }
        set
    }

    /// Writes the set into a program created from [`crate::pipelines::effects::Effect::Lighting`].
    pub fn apply(
        &self,
        device: &mut dyn GpuDevice,
        program: &ShaderProgram,
        camera_position: Vector3<f32>,
    ) -> Result<(), GpuError> {
        program.set_uniform(device, "uCameraPos", camera_position)?;
        let dir = self.directional.unwrap_or(DirLight {
            direction: Vector3::unit_y(),
            color: Vector3::new(0.0, 0.0, 0.0),
            intensity: 0.0,
        });
        program.set_uniform(device, "uDirLightDirection", dir.direction)?;
        program.set_uniform(device, "uDirLightColor", dir.color)?;
        program.set_uniform(device, "uDirLightIntensity", dir.intensity)?;
        program.set_uniform(device, "uPointLightCount", self.points.len() as i32)?;
        for (i, point) in self.points.iter().enumerate() {
            program.set_uniform(device, &format!("uPointLights[{i}].position"), point.position)?;
            program.set_uniform(device, &format!("uPointLights[{i}].color"), point.color)?;
            program.set_uniform(device, &format!("uPointLights[{i}].intensity"), point.intensity)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point(x: f32) -> Light {
        Light::Point(PointLight {
            position: Vector3::new(x, 0.0, 0.0),
            color: Vector3::new(1.0, 1.0, 1.0),
            intensity: 1.0,
        })
    }

    #[test]
    fn point_lights_follow_their_node() {
        let light = point(1.0);
        let world = Matrix4::from_translation(Vector3::new(0.0, 2.0, 0.0));
        let Light::Point(moved) = light.in_world(&world) else {
            panic!("light kind changed");
        };
        assert_eq!(moved.position, Vector3::new(1.0, 2.0, 0.0));
    }

    #[test]
    fn directional_lights_ignore_translation() {
        let light = Light::Directional(DirLight {
            direction: Vector3::new(0.0, 2.0, 0.0),
            color: Vector3::new(1.0, 1.0, 1.0),
            intensity: 1.0,
        });
        let world = Matrix4::from_translation(Vector3::new(5.0, 5.0, 5.0));
        let Light::Directional(dir) = light.in_world(&world) else {
            panic!("light kind changed");
        };
        assert_eq!(dir.direction, Vector3::unit_y());
    }

    #[test]
    fn collect_caps_point_lights() {
        let lights: Vec<Light> = (0..6).map(|i| point(i as f32)).collect();
        let set = LightSet::collect(lights.iter().map(|l| (l, Matrix4::from_scale(1.0))));
        assert_eq!(set.points.len(), MAX_POINT_LIGHTS);
        assert!(set.directional.is_none());
    }
}
