//! Isolated service environment for integration tests.

#![allow(dead_code)]

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tempfile::TempDir;

use splatforge::config::load_config_from_str;
use splatforge::db::Database;
use splatforge::store::LocalBucket;
use splatforge::{AppConfig, ArtifactStore, ObjectStore, PipelineService};

/// Output marker printed by the stand-in trainers.
pub const OUTPUT_MARKER_DIR: &str = "./output/3f2a9c1b7e";
/// `training.default_output_dir` as configured by the harness.
pub const DEFAULT_OUTPUT_DIR: &str = "./output";

/// Converter stand-in: `convert.sh <in> --output <out>`.
pub const COPY_CONVERTER: &str = "cp \"$1\" \"$3\"\n";
/// Converter that never finishes on its own.
pub const HANGING_CONVERTER: &str = "exec sleep 30\n";

/// Behaviour of the stand-in trainer script.
///
/// Invoked as `sh trainer.sh --video <path> --iterations <n>` from the
/// harness work directory.
#[derive(Debug, Clone, Copy)]
pub enum Trainer {
    /// Writes a `.ply` checkpoint (a copy of the video) and prints the marker.
    WritesPrecursor,
    /// Writes a `.ply` checkpoint straight into the default output dir and
    /// prints no marker.
    WritesPrecursorUnmarked,
    /// Prints the marker but writes nothing.
    WritesNothing,
    /// Exits non-zero after printing to stderr.
    Crashes,
    /// Prints one progress line, then sleeps until killed.
    Hangs,
}

impl Trainer {
    fn script(self) -> String {
        let writes_ply = |root: &str| {
            format!(
                "dir={root}/point_cloud/iteration_7000\n\
                 mkdir -p \"$dir\"\n\
                 cp \"$2\" \"$dir/point_cloud.ply\"\n\
                 echo \"training $4 iterations\"\n"
            )
        };
        match self {
            Trainer::WritesPrecursor => format!(
                "{}echo \"Output folder: {}\"\n",
                writes_ply(OUTPUT_MARKER_DIR),
                OUTPUT_MARKER_DIR
            ),
            Trainer::WritesPrecursorUnmarked => writes_ply(DEFAULT_OUTPUT_DIR),
            Trainer::WritesNothing => format!("echo \"Output folder: {}\"\n", OUTPUT_MARKER_DIR),
            Trainer::Crashes => "echo \"CUDA out of memory\" >&2\nexit 1\n".to_string(),
            Trainer::Hangs => "echo \"epoch 1\"\nexec sleep 30\n".to_string(),
        }
    }
}

type BackendWrapper = Box<dyn FnOnce(Arc<dyn ObjectStore>) -> Arc<dyn ObjectStore>>;

/// Builder for [`TestHarness`].
pub struct HarnessBuilder {
    trainer: Trainer,
    converter: &'static str,
    retain_outputs: bool,
    wrap_backend: Option<BackendWrapper>,
}

impl HarnessBuilder {
    pub fn converter(mut self, script: &'static str) -> Self {
        self.converter = script;
        self
    }

    pub fn retain_outputs(mut self, retain: bool) -> Self {
        self.retain_outputs = retain;
        self
    }

    /// Wraps the local bucket, e.g. to inject backend failures.
    pub fn wrap_backend<F>(mut self, wrap: F) -> Self
    where
        F: FnOnce(Arc<dyn ObjectStore>) -> Arc<dyn ObjectStore> + 'static,
    {
        self.wrap_backend = Some(Box::new(wrap));
        self
    }

    pub fn build(self) -> TestHarness {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let base = temp_dir.path().to_path_buf();

        let upload_root = base.join("uploads");
        let object_root = base.join("objects");
        let work_dir = base.join("work");
        for dir in [&upload_root, &object_root, &work_dir] {
            std::fs::create_dir_all(dir).expect("Failed to create harness directory");
        }

        let trainer_path = write_script(&base, "trainer.sh", &self.trainer.script());
        let converter_path = write_script(&base, "convert.sh", self.converter);

        let config = load_config_from_str(&format!(
            r#"{{
                "version": "1.0",
                "database": {{ "path": "{base}/splatforge.db" }},
                "storage": {{ "backend": "local", "bucket": "splats", "root": "{objects}" }},
                "paths": {{ "upload_root": "{uploads}" }},
                "training": {{
                    "interpreter": "/bin/sh",
                    "trainer": "{trainer}",
                    "working_dir": "{work}",
                    "default_output_dir": "{default_output}",
                    "default_iterations": 7000
                }},
                "conversion": {{ "interpreter": "/bin/sh", "converter": "{converter}" }},
                "pipeline": {{ "retain_outputs": {retain} }},
                "logging": {{ "level": "warn" }}
            }}"#,
            base = base.display(),
            objects = object_root.display(),
            uploads = upload_root.display(),
            trainer = trainer_path.display(),
            work = work_dir.display(),
            default_output = DEFAULT_OUTPUT_DIR,
            converter = converter_path.display(),
            retain = self.retain_outputs,
        ))
        .expect("Failed to parse harness config");

        let db = Database::open(&config.database).expect("Failed to open database");
        let local: Arc<dyn ObjectStore> = Arc::new(LocalBucket::new(&object_root, "splats"));
        let backend = match self.wrap_backend {
            Some(wrap) => wrap(local),
            None => local,
        };
        let store = ArtifactStore::new(
            backend,
            "splats",
            config.staging_dir(),
            config.storage.copy_buffer_size,
        );
        let service = PipelineService::new(Arc::new(config.clone()), db, Arc::new(store));

        TestHarness {
            temp_dir,
            upload_root,
            object_root,
            work_dir,
            config,
            service,
        }
    }
}

pub struct TestHarness {
    temp_dir: TempDir,
    pub upload_root: PathBuf,
    pub object_root: PathBuf,
    pub work_dir: PathBuf,
    pub config: AppConfig,
    pub service: PipelineService,
}

impl TestHarness {
    pub fn new(trainer: Trainer) -> Self {
        Self::builder(trainer).build()
    }

    pub fn with_converter(trainer: Trainer, converter: &'static str) -> Self {
        Self::builder(trainer).converter(converter).build()
    }

    pub fn builder(trainer: Trainer) -> HarnessBuilder {
        HarnessBuilder {
            trainer,
            converter: COPY_CONVERTER,
            retain_outputs: true,
            wrap_backend: None,
        }
    }

    pub fn base(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Uploads `content` as a video for `user_id`.
    pub async fn upload(&self, user_id: i64, content: &[u8]) -> i64 {
        self.service
            .upload_video(
                user_id,
                "clip",
                "clip.mp4",
                std::io::Cursor::new(content.to_vec()),
                Some(content.len() as u64),
            )
            .await
            .expect("Failed to upload video")
    }

    /// Path of an object in the local bucket.
    pub fn object_path(&self, key: &str) -> PathBuf {
        self.object_root.join("splats").join(key)
    }

    /// Where the trainer's marker resolves to.
    pub fn output_root(&self) -> PathBuf {
        self.work_dir.join(OUTPUT_MARKER_DIR)
    }
}

fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, body).expect("Failed to write script");
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))
        .expect("Failed to chmod script");
    path
}
