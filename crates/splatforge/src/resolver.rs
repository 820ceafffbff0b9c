//! Locates the servable artifact in a trainer output root, converting the
//! point-cloud precursor when only that exists.
//!
//! Layout written by the trainer:
//!
//! ```text
//! <root>/point_cloud/iteration_<N>/point_cloud.<ext>
//! <root>/input.<ext>
//! ```
//!
//! Higher iterations win. Nothing is ever deleted or overwritten here.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

use crate::config::AppConfig;
use crate::process::{conversion_invocation, LineObserver, ProcessError, ProcessRunner};
use crate::sanitize::redact_path;

/// Checkpoints the trainer always writes.
pub const STANDARD_ITERATIONS: [u32; 2] = [30_000, 7_000];
pub const SERVABLE_EXTENSION: &str = "splat";
pub const PRECURSOR_EXTENSION: &str = "ply";

#[derive(Error, Debug)]
pub enum ResolveError {
    #[error("No servable artifact or precursor under '{}'", .root.display())]
    NoPrecursor { root: PathBuf },

    #[error("Conversion of '{}' failed: {source}", .input.display())]
    Conversion {
        input: PathBuf,
        #[source]
        source: ProcessError,
    },

    #[error("Conversion succeeded but '{}' was not produced", .expected.display())]
    ConversionProducedNothing { expected: PathBuf },

    #[error("Resolution canceled")]
    Canceled,
}

impl ResolveError {
    pub fn is_canceled(&self) -> bool {
        matches!(self, ResolveError::Canceled)
    }
}

/// Candidate paths under an output root, in search order.
#[derive(Debug, Clone)]
pub struct ArtifactLayout {
    iterations: Vec<u32>,
}

impl ArtifactLayout {
    /// Standard checkpoints plus the work's own iteration count, highest first.
    pub fn new(iterations_hint: Option<u32>) -> Self {
        let mut iterations: Vec<u32> = STANDARD_ITERATIONS.to_vec();
        iterations.extend(iterations_hint.filter(|n| *n > 0));
        iterations.sort_unstable_by(|a, b| b.cmp(a));
        iterations.dedup();
        Self { iterations }
    }

    pub fn iterations(&self) -> &[u32] {
        &self.iterations
    }

    pub fn candidates(&self, root: &Path, extension: &str) -> Vec<PathBuf> {
        let file = format!("point_cloud.{}", extension);
        self.iterations
            .iter()
            .map(|n| {
                root.join("point_cloud")
                    .join(format!("iteration_{}", n))
                    .join(&file)
            })
            .chain(std::iter::once(root.join(format!("input.{}", extension))))
            .collect()
    }
}

/// Where a servable artifact came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolved {
    pub path: PathBuf,
    /// Produced by this call from a precursor.
    pub converted: bool,
}

pub struct ArtifactResolver {
    config: Arc<AppConfig>,
    runner: ProcessRunner,
}

impl ArtifactResolver {
    pub fn new(config: Arc<AppConfig>, runner: ProcessRunner) -> Self {
        Self { config, runner }
    }

    /// Finds or produces the servable artifact under `root`.
    #[instrument(skip(self, cancel, observer), fields(root = %redact_path(root)))]
    pub async fn resolve(
        &self,
        root: &Path,
        iterations_hint: Option<u32>,
        cancel: &CancellationToken,
        observer: Option<LineObserver<'_>>,
    ) -> Result<Resolved, ResolveError> {
        let layout = ArtifactLayout::new(iterations_hint);

        if let Some(path) = first_existing(&layout.candidates(root, SERVABLE_EXTENSION)).await {
            debug!(path = %path.display(), "Servable artifact present");
            return Ok(Resolved {
                path,
                converted: false,
            });
        }

        let precursor = first_existing(&layout.candidates(root, PRECURSOR_EXTENSION))
            .await
            .ok_or_else(|| ResolveError::NoPrecursor {
                root: root.to_path_buf(),
            })?;

        if cancel.is_cancelled() {
            return Err(ResolveError::Canceled);
        }

        let output = precursor.with_extension(SERVABLE_EXTENSION);
        info!(precursor = %precursor.display(), "Converting precursor");
        let invocation = conversion_invocation(&self.config, &precursor, &output);
        self.runner
            .run(&invocation, cancel, observer)
            .await
            .map_err(|source| match source {
                ProcessError::Canceled { .. } => ResolveError::Canceled,
                source => ResolveError::Conversion {
                    input: precursor.clone(),
                    source,
                },
            })?;

        if !is_file(&output).await {
            return Err(ResolveError::ConversionProducedNothing { expected: output });
        }
        Ok(Resolved {
            path: output,
            converted: true,
        })
    }
}

async fn first_existing(candidates: &[PathBuf]) -> Option<PathBuf> {
    for candidate in candidates {
        if is_file(candidate).await {
            return Some(candidate.clone());
        }
    }
    None
}

async fn is_file(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .map(|m| m.is_file())
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::PathConstraint;

    #[test]
    fn test_layout_order() {
        let layout = ArtifactLayout::new(None);
        assert_eq!(layout.iterations(), &[30_000, 7_000]);

        let root = Path::new("/out");
        assert_eq!(
            layout.candidates(root, "splat"),
            vec![
                PathBuf::from("/out/point_cloud/iteration_30000/point_cloud.splat"),
                PathBuf::from("/out/point_cloud/iteration_7000/point_cloud.splat"),
                PathBuf::from("/out/input.splat"),
            ]
        );
    }

    #[test]
    fn test_layout_includes_hint() {
        assert_eq!(
            ArtifactLayout::new(Some(15_000)).iterations(),
            &[30_000, 15_000, 7_000]
        );
        assert_eq!(ArtifactLayout::new(Some(7_000)).iterations(), &[30_000, 7_000]);
        assert_eq!(
            ArtifactLayout::new(Some(50_000)).iterations(),
            &[50_000, 30_000, 7_000]
        );
        assert_eq!(ArtifactLayout::new(Some(0)).iterations(), &[30_000, 7_000]);
    }

    #[cfg(unix)]
    mod unix {
        use super::*;
        use crate::config::load_config_from_str;
        use std::os::unix::fs::PermissionsExt;

        struct Fixture {
            dir: tempfile::TempDir,
            resolver: ArtifactResolver,
        }

        impl Fixture {
            fn root(&self) -> PathBuf {
                self.dir.path().join("output")
            }

            fn ran_flag(&self) -> PathBuf {
                self.dir.path().join("converter-ran")
            }

            fn write(&self, relative: &str, content: &[u8]) -> PathBuf {
                let path = self.root().join(relative);
                std::fs::create_dir_all(path.parent().unwrap()).unwrap();
                std::fs::write(&path, content).unwrap();
                path
            }
        }

        /// Converter stand-in: `convert.sh <in> --output <out>`.
        fn fixture(converter_body: &str) -> Fixture {
            let dir = tempfile::tempdir().unwrap();
            let converter = dir.path().join("convert.sh");
            let flag = dir.path().join("converter-ran");
            std::fs::write(
                &converter,
                format!("touch '{}'\n{}\n", flag.display(), converter_body),
            )
            .unwrap();
            std::fs::set_permissions(&converter, std::fs::Permissions::from_mode(0o755)).unwrap();

            let config = load_config_from_str(&format!(
                r#"{{
                    "version": "1.0",
                    "storage": {{ "backend": "local", "bucket": "b", "root": "{root}" }},
                    "paths": {{ "upload_root": "{root}" }},
                    "training": {{ "interpreter": "/bin/sh", "trainer": "/bin/true" }},
                    "conversion": {{ "converter": "{converter}" }}
                }}"#,
                root = dir.path().display(),
                converter = converter.display(),
            ))
            .unwrap();

            let resolver = ArtifactResolver::new(
                Arc::new(config),
                ProcessRunner::new(PathConstraint::Unrestricted),
            );
            Fixture { dir, resolver }
        }

        const COPY_CONVERTER: &str = r#"cp "$1" "$3""#;

        #[tokio::test]
        async fn test_prefers_highest_servable() {
            let fx = fixture(COPY_CONVERTER);
            fx.write("input.splat", b"root");
            fx.write("point_cloud/iteration_7000/point_cloud.splat", b"7k");
            let best = fx.write("point_cloud/iteration_30000/point_cloud.splat", b"30k");

            let resolved = fx
                .resolver
                .resolve(&fx.root(), None, &CancellationToken::new(), None)
                .await
                .unwrap();
            assert_eq!(resolved.path, best);
            assert!(!resolved.converted);
            assert!(!fx.ran_flag().exists());
        }

        #[tokio::test]
        async fn test_servable_beats_higher_precursor() {
            let fx = fixture(COPY_CONVERTER);
            fx.write("point_cloud/iteration_30000/point_cloud.ply", b"ply");
            let direct = fx.write("input.splat", b"root");

            let resolved = fx
                .resolver
                .resolve(&fx.root(), None, &CancellationToken::new(), None)
                .await
                .unwrap();
            assert_eq!(resolved.path, direct);
            assert!(!fx.ran_flag().exists());
        }

        #[tokio::test]
        async fn test_converts_precursor_and_keeps_it() {
            let fx = fixture(COPY_CONVERTER);
            let ply = fx.write("point_cloud/iteration_7000/point_cloud.ply", b"points");

            let resolved = fx
                .resolver
                .resolve(&fx.root(), None, &CancellationToken::new(), None)
                .await
                .unwrap();
            assert!(resolved.converted);
            assert_eq!(resolved.path, ply.with_extension("splat"));
            assert_eq!(std::fs::read(&resolved.path).unwrap(), b"points");
            assert!(ply.exists());

            // Second resolution short-circuits on the produced file.
            std::fs::remove_file(fx.ran_flag()).unwrap();
            let again = fx
                .resolver
                .resolve(&fx.root(), None, &CancellationToken::new(), None)
                .await
                .unwrap();
            assert!(!again.converted);
            assert!(!fx.ran_flag().exists());
        }

        #[tokio::test]
        async fn test_nothing_found_runs_no_subprocess() {
            let fx = fixture(COPY_CONVERTER);
            std::fs::create_dir_all(fx.root()).unwrap();

            let err = fx
                .resolver
                .resolve(&fx.root(), None, &CancellationToken::new(), None)
                .await
                .unwrap_err();
            assert!(matches!(err, ResolveError::NoPrecursor { .. }));
            assert!(!fx.ran_flag().exists());
        }

        #[tokio::test]
        async fn test_converter_failure() {
            let fx = fixture("exit 2");
            fx.write("input.ply", b"points");
            let err = fx
                .resolver
                .resolve(&fx.root(), None, &CancellationToken::new(), None)
                .await
                .unwrap_err();
            assert!(matches!(err, ResolveError::Conversion { .. }));
        }

        #[tokio::test]
        async fn test_converter_that_writes_nothing() {
            let fx = fixture("exit 0");
            fx.write("input.ply", b"points");
            let err = fx
                .resolver
                .resolve(&fx.root(), None, &CancellationToken::new(), None)
                .await
                .unwrap_err();
            assert!(matches!(err, ResolveError::ConversionProducedNothing { .. }));
        }

        #[tokio::test]
        async fn test_canceled_before_conversion() {
            let fx = fixture(COPY_CONVERTER);
            fx.write("input.ply", b"points");
            let token = CancellationToken::new();
            token.cancel();
            let err = fx
                .resolver
                .resolve(&fx.root(), None, &token, None)
                .await
                .unwrap_err();
            assert!(err.is_canceled());
            assert!(!fx.ran_flag().exists());
        }
    }
}
