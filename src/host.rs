use std::path::Path;

use crate::models::ImageFileRef;

/// Capability implemented by the host-integration layer (the code that owns
/// the content-creation application's environment light). The browser core
/// never imports host types or creates host objects; it only hands over
/// paths and parameter values through this seam.
pub trait EnvironmentLightSink {
    /// Point the environment light at a new HDR map.
    fn set_environment_map(&mut self, env_map: &Path);

    /// Rotate the environment around the vertical axis, in degrees.
    fn set_rotation(&mut self, degrees: f32);

    /// Scale the light's intensity multiplier.
    fn set_intensity(&mut self, intensity: f32);
}

/// Full-resolution source path for the host to load — the original file,
/// not the downsampled preview the grid displays.
pub fn resolve_source_path(file: &ImageFileRef) -> &Path {
    file.source_path()
}

/// Apply a browsed image as the environment map. Called by the UI layer
/// when the artist picks a thumbnail.
pub fn apply_environment(sink: &mut dyn EnvironmentLightSink, file: &ImageFileRef) {
    sink.set_environment_map(resolve_source_path(file));
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::DateTime;
    use std::path::PathBuf;

    #[derive(Default)]
    struct FakeSink {
        env_map: Option<PathBuf>,
        rotation: f32,
        intensity: f32,
    }

    impl EnvironmentLightSink for FakeSink {
        fn set_environment_map(&mut self, env_map: &Path) {
            self.env_map = Some(env_map.to_path_buf());
        }

        fn set_rotation(&mut self, degrees: f32) {
            self.rotation = degrees;
        }

        fn set_intensity(&mut self, intensity: f32) {
            self.intensity = intensity;
        }
    }

    #[test]
    fn apply_hands_over_the_original_path() {
        let file = ImageFileRef {
            path: PathBuf::from("/library/studio_08.exr"),
            modified_at: DateTime::UNIX_EPOCH,
            file_size: 42,
        };
        assert_eq!(
            resolve_source_path(&file),
            Path::new("/library/studio_08.exr")
        );

        let mut sink = FakeSink::default();
        apply_environment(&mut sink, &file);
        sink.set_rotation(90.0);
        sink.set_intensity(1.5);

        assert_eq!(sink.env_map.as_deref(), Some(file.source_path()));
        assert_eq!(sink.rotation, 90.0);
        assert_eq!(sink.intensity, 1.5);
    }
}
