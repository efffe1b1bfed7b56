//! Full pipeline integration: build → archive (in-process and plugin
//! formats) → release with checksums and retried uploads, over a temporary
//! project, without touching the network or a real compiler.

use std::io::Read;
use std::path::Path;
use std::sync::{Arc, Mutex};

use shipwright::build::{BuildError, BuildJob, Toolchain};
use shipwright::commands::build::BuildOpts;
use shipwright::commands::{all, archive, build, release, Core, CoreOpts};
use shipwright::checksum::ChecksumManifest;
use shipwright::release::{FakeClient, PublishClient, ReleaseClient};
use shipwright::CancellationToken;

/// Writes deterministic marker binaries instead of invoking a compiler.
struct WritingToolchain;

impl Toolchain for WritingToolchain {
    fn build(&self, job: &BuildJob, _token: &CancellationToken) -> Result<(), BuildError> {
        std::fs::write(
            &job.out_filename,
            format!("binary {} {} {}", job.target.path, job.target.os, job.arch),
        )?;
        Ok(())
    }
}

fn write_config(dir: &Path, body: &str) {
    std::fs::write(dir.join("shipwright.toml"), body).unwrap();
}

fn config_with_plugin_archive() -> String {
    format!(
        r#"
project = "demo"

[build_settings]
command = "not-used-by-tests"
binary = "demo"

[release_settings]
type = "fake"
repository = "demo"
repository_owner = "example"

[[builds]]
path = "cli"

[[builds.os]]
name = "linux"

[[builds.os.archs]]
name = "amd64"

[[builds.os.archs]]
name = "arm64"

[[archives]]
paths = ["builds/cli/linux/amd64"]

[archives.archive_settings]
format = "tar.gz"
extension = ".tar.gz"
binary_dir = "bin"

[[archives.archive_settings.extra_files]]
source_path = "README.md"
target_path = "README.md"

[[archives]]
paths = ["builds/cli/linux/arm64"]

[archives.archive_settings]
format = "plugin"
extension = ".tar.gz"

[archives.archive_settings.plugin]
id = "tar"
command = "{plugin}"
args = ["--codec", "toml"]
codec = "toml"

[[releases]]
path = "main"
paths = ["archives/**"]
"#,
        plugin = env!("CARGO_BIN_EXE_shipwright-plugin-tar")
    )
}

fn core_for(dir: &Path) -> Core {
    let opts = CoreOpts {
        tag: "v2.0.0".to_string(),
        project_dir: dir.to_path_buf(),
        quiet: true,
        ..Default::default()
    };
    Core::init(opts, CancellationToken::new()).unwrap()
}

#[test]
fn test_full_pipeline_with_plugin_archives() {
    let dir = tempfile::tempdir().unwrap();
    write_config(dir.path(), &config_with_plugin_archive());
    std::fs::write(dir.path().join("README.md"), "# demo\n").unwrap();

    let core = core_for(dir.path());

    // Build.
    build::run(&core, Arc::new(WritingToolchain), &BuildOpts::default()).unwrap();
    assert!(core.builds_dir().join("cli/linux/amd64/demo").is_file());
    assert!(core.builds_dir().join("cli/linux/arm64/demo").is_file());

    // Archive: one in-process tar.gz, one via the real plugin subprocess.
    archive::run(&core).unwrap();
    let in_process = core
        .archives_dir()
        .join("cli/linux/amd64/demo_v2.0.0_linux_amd64.tar.gz");
    let via_plugin = core
        .archives_dir()
        .join("cli/linux/arm64/demo_v2.0.0_linux_arm64.tar.gz");
    assert!(in_process.is_file());
    assert!(via_plugin.is_file());

    // The in-process archive holds the binary under binary_dir plus the
    // extra file.
    let mut names = Vec::new();
    let mut tar = tar::Archive::new(flate2::read::GzDecoder::new(
        std::fs::File::open(&in_process).unwrap(),
    ));
    for entry in tar.entries().unwrap() {
        let mut entry = entry.unwrap();
        names.push(entry.path().unwrap().to_string_lossy().into_owned());
        let mut sink = Vec::new();
        entry.read_to_end(&mut sink).unwrap();
    }
    assert_eq!(names, ["bin/demo", "README.md"]);

    // Release: checksum manifest plus every archive, through the fake
    // backend.
    let client = Arc::new(FakeClient::new());
    let factory_client = Arc::clone(&client);
    release::run_with(&core, "main", &move |_| {
        Ok(factory_client.clone() as Arc<dyn PublishClient>)
    })
    .unwrap();

    let uploads = client.uploads();
    assert_eq!(uploads.len(), 3, "two archives plus the manifest");

    let manifest = ChecksumManifest::read_from(
        &core
            .releases_dir()
            .join("main")
            .join("demo_2.0.0_checksums.txt"),
    )
    .unwrap();
    assert_eq!(manifest.lines().len(), 2);
    assert!(manifest.digest_of("demo_v2.0.0_linux_amd64.tar.gz").is_some());
    assert!(manifest.digest_of("demo_v2.0.0_linux_arm64.tar.gz").is_some());

    core.close();
}

#[test]
fn test_manifest_content_is_stable_across_runs() {
    let dir = tempfile::tempdir().unwrap();
    write_config(dir.path(), &config_with_plugin_archive());
    std::fs::write(dir.path().join("README.md"), "# demo\n").unwrap();

    let core = core_for(dir.path());
    build::run(&core, Arc::new(WritingToolchain), &BuildOpts::default()).unwrap();
    archive::run(&core).unwrap();

    let run_release = || {
        let client = Arc::new(FakeClient::new());
        let factory_client = Arc::clone(&client);
        release::run_with(&core, "main", &move |_| {
            Ok(factory_client.clone() as Arc<dyn PublishClient>)
        })
        .unwrap();
        std::fs::read_to_string(
            core.releases_dir()
                .join("main")
                .join("demo_2.0.0_checksums.txt"),
        )
        .unwrap()
    };

    let first = run_release();
    let second = run_release();
    assert_eq!(first, second);
    core.close();
}

#[test]
fn test_flaky_uploads_are_retried_to_success() {
    struct FlakyClient {
        inner: FakeClient,
        failures_left: Mutex<u32>,
        attempts: Mutex<u32>,
    }

    impl shipwright::release::ReleaseClient for FlakyClient {
        fn create_release(
            &self,
            info: &shipwright::release::ReleaseInfo,
        ) -> Result<i64, shipwright::release::ReleaseError> {
            self.inner.create_release(info)
        }

        fn upload_assets_file(
            &self,
            info: &shipwright::release::ReleaseInfo,
            file: &Path,
            release_id: i64,
        ) -> Result<(), shipwright::release::UploadError> {
            *self.attempts.lock().unwrap() += 1;
            let mut failures = self.failures_left.lock().unwrap();
            if *failures > 0 {
                *failures -= 1;
                return Err(shipwright::release::UploadError::Transient(
                    "connection reset".to_string(),
                ));
            }
            self.inner.upload_assets_file(info, file, release_id)
        }
    }

    impl PublishClient for FlakyClient {
        fn release_by_tag(
            &self,
            owner: &str,
            repo: &str,
            tag: &str,
        ) -> Result<(i64, bool), shipwright::release::ReleaseError> {
            self.inner.release_by_tag(owner, repo, tag)
        }

        fn publish_release(
            &self,
            owner: &str,
            repo: &str,
            release_id: i64,
        ) -> Result<(), shipwright::release::ReleaseError> {
            self.inner.publish_release(owner, repo, release_id)
        }

        fn update_file_in_repo(
            &self,
            owner: &str,
            repo: &str,
            path: &str,
            message: &str,
            content: &[u8],
        ) -> Result<String, shipwright::release::ReleaseError> {
            self.inner.update_file_in_repo(owner, repo, path, message, content)
        }
    }

    let dir = tempfile::tempdir().unwrap();
    write_config(dir.path(), &config_with_plugin_archive());
    std::fs::write(dir.path().join("README.md"), "# demo\n").unwrap();

    let core = core_for(dir.path());
    build::run(&core, Arc::new(WritingToolchain), &BuildOpts::default()).unwrap();
    archive::run(&core).unwrap();

    let client = Arc::new(FlakyClient {
        inner: FakeClient::new(),
        failures_left: Mutex::new(2),
        attempts: Mutex::new(0),
    });
    let factory_client = Arc::clone(&client);
    release::run_with(&core, "main", &move |_| {
        Ok(factory_client.clone() as Arc<dyn PublishClient>)
    })
    .unwrap();

    // Three assets, two transient failures retried on top.
    assert_eq!(client.inner.uploads().len(), 3);
    assert_eq!(*client.attempts.lock().unwrap(), 5);
    core.close();
}

#[test]
fn test_all_command_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    write_config(dir.path(), &config_with_plugin_archive());
    std::fs::write(dir.path().join("README.md"), "# demo\n").unwrap();

    // The configured release type is `fake`, so `all` runs standalone.
    let core = core_for(dir.path());
    all::run(&core, Arc::new(WritingToolchain), "main").unwrap();

    assert!(core
        .releases_dir()
        .join("main")
        .join("demo_2.0.0_checksums.txt")
        .is_file());
    core.close();
}

#[test]
fn test_dry_run_pipeline_probes_the_plugin() {
    let dir = tempfile::tempdir().unwrap();
    write_config(dir.path(), &config_with_plugin_archive());
    std::fs::write(dir.path().join("README.md"), "# demo\n").unwrap();

    let opts = CoreOpts {
        tag: "v2.0.0".to_string(),
        project_dir: dir.path().to_path_buf(),
        quiet: true,
        dry_run: true,
        ..Default::default()
    };
    let core = Core::init(opts, CancellationToken::new()).unwrap();

    // The chain validates the whole plan, including a live heartbeat probe
    // of the plugin subprocess, without producing any artifact.
    all::run(&core, Arc::new(WritingToolchain), "main").unwrap();

    assert!(!core.builds_dir().exists());
    assert!(!core.archives_dir().exists());
    assert!(!core.releases_dir().join("main").join("demo_2.0.0_checksums.txt").exists());
    core.close();
}

#[test]
fn test_selection_narrows_the_pipeline() {
    let dir = tempfile::tempdir().unwrap();
    write_config(dir.path(), &config_with_plugin_archive());
    std::fs::write(dir.path().join("README.md"), "# demo\n").unwrap();

    let opts = CoreOpts {
        tag: "v2.0.0".to_string(),
        project_dir: dir.path().to_path_buf(),
        quiet: true,
        paths: vec!["builds/cli/linux/amd64".to_string()],
        ..Default::default()
    };
    let core = Core::init(opts, CancellationToken::new()).unwrap();

    build::run(&core, Arc::new(WritingToolchain), &BuildOpts::default()).unwrap();
    assert!(core.builds_dir().join("cli/linux/amd64/demo").is_file());
    assert!(!core.builds_dir().join("cli/linux/arm64/demo").exists());
    core.close();
}
