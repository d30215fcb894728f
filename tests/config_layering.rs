use std::sync::Mutex;

use tempfile::NamedTempFile;

use facemesh::config::FaceMeshConfig;
use facemesh::{BackpressurePolicy, CameraFacing, PermissionMode};

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "FACEMESH_CONFIG",
        "FACEMESH_CAMERA_FRONT",
        "FACEMESH_CAMERA_REAR",
        "FACEMESH_FACING",
        "FACEMESH_WIDTH",
        "FACEMESH_HEIGHT",
        "FACEMESH_FPS",
        "FACEMESH_RUN_ON_GPU",
        "FACEMESH_REFINE_LANDMARKS",
        "FACEMESH_STATIC_IMAGE_MODE",
        "FACEMESH_MODEL_PATH",
        "FACEMESH_SNAPSHOT_DIR",
        "FACEMESH_PERMISSION",
    ] {
        std::env::remove_var(key);
    }
}

#[test]
fn defaults_without_file_or_env() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let cfg = FaceMeshConfig::load().expect("load config");
    assert_eq!(cfg.camera.facing, CameraFacing::Front);
    assert_eq!(cfg.camera.device(), "stub://front_camera");
    assert_eq!(cfg.camera.target_fps, 30);
    assert!(!cfg.options.static_image_mode);
    assert!(cfg.options.refine_landmarks);
    assert!(cfg.options.run_on_gpu);
    assert_eq!(cfg.pipeline.backpressure, BackpressurePolicy::DropOldest);
    assert_eq!(cfg.permission, PermissionMode::Auto);
    assert!(cfg.backend.model_path.is_none());
}

#[test]
fn loads_json_file_and_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    let json = r#"{
        "camera": {
            "front": "stub://lobby",
            "rear": "/dev/video2",
            "facing": "rear",
            "width": 800,
            "height": 600,
            "target_fps": 12
        },
        "face_mesh": {
            "refine_landmarks": false,
            "max_num_faces": 3,
            "min_detection_confidence": 0.6
        },
        "pipeline": {
            "queue_capacity": 4,
            "backpressure": "block"
        },
        "permission": "grant"
    }"#;
    std::io::Write::write_all(&mut file, json.as_bytes()).expect("write config");

    std::env::set_var("FACEMESH_CONFIG", file.path());
    std::env::set_var("FACEMESH_FACING", "front");
    std::env::set_var("FACEMESH_FPS", "24");
    std::env::set_var("FACEMESH_RUN_ON_GPU", "false");
    std::env::set_var("FACEMESH_STATIC_IMAGE_MODE", "yes");

    let cfg = FaceMeshConfig::load().expect("load config");

    assert_eq!(cfg.camera.devices.front, "stub://lobby");
    assert_eq!(cfg.camera.devices.rear, "/dev/video2");
    assert_eq!(cfg.camera.facing, CameraFacing::Front);
    assert_eq!(cfg.camera.device(), "stub://lobby");
    assert_eq!((cfg.camera.width, cfg.camera.height), (800, 600));
    assert_eq!(cfg.camera.target_fps, 24);
    assert!(!cfg.options.refine_landmarks);
    assert!(!cfg.options.run_on_gpu);
    assert!(cfg.options.static_image_mode);
    assert_eq!(cfg.options.max_num_faces, 3);
    assert!((cfg.options.min_detection_confidence - 0.6).abs() < 1e-6);
    assert_eq!(cfg.pipeline.queue_capacity, 4);
    assert_eq!(cfg.pipeline.backpressure, BackpressurePolicy::Block);
    assert_eq!(cfg.permission, PermissionMode::Grant);

    let settings = cfg.session_settings();
    assert_eq!(settings.facing, CameraFacing::Front);
    assert_eq!(settings.queue_capacity, 4);

    clear_env();
}

#[test]
fn loads_toml_by_extension() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let snapshot_dir = tempfile::tempdir().expect("snapshot dir");
    let mut file = tempfile::Builder::new()
        .suffix(".toml")
        .tempfile()
        .expect("temp config");
    let toml = format!(
        r#"
permission = "deny"

[camera]
front = "dir://{}"
width = 320
height = 240

[render]
refresh_hz = 15
snapshot_dir = "{}"
snapshot_format = "jpeg"
"#,
        snapshot_dir.path().display(),
        snapshot_dir.path().display()
    );
    std::io::Write::write_all(&mut file, toml.as_bytes()).expect("write config");
    std::env::set_var("FACEMESH_CONFIG", file.path());
    std::env::set_var("FACEMESH_PERMISSION", "auto");

    let cfg = FaceMeshConfig::load().expect("load config");
    assert_eq!(
        cfg.camera.device(),
        format!("dir://{}", snapshot_dir.path().display())
    );
    assert_eq!((cfg.camera.width, cfg.camera.height), (320, 240));
    assert_eq!(cfg.render.refresh_hz, 15);
    assert_eq!(cfg.render.snapshot_dir.as_deref(), Some(snapshot_dir.path()));
    assert_eq!(cfg.permission, PermissionMode::Auto);

    clear_env();
}

#[test]
fn rejects_invalid_values() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("FACEMESH_WIDTH", "wide");
    assert!(FaceMeshConfig::load().is_err());
    clear_env();

    std::env::set_var("FACEMESH_WIDTH", "0");
    let err = FaceMeshConfig::load().unwrap_err();
    assert!(err.to_string().contains("non-zero"));
    clear_env();

    std::env::set_var("FACEMESH_RUN_ON_GPU", "sometimes");
    assert!(FaceMeshConfig::load().is_err());
    clear_env();

    std::env::set_var("FACEMESH_FACING", "sideways");
    assert!(FaceMeshConfig::load().is_err());
    clear_env();

    std::env::set_var("FACEMESH_MODEL_PATH", "/definitely/not/a/model.onnx");
    let err = FaceMeshConfig::load().unwrap_err();
    assert!(err.to_string().contains("model file not found"));
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    std::io::Write::write_all(&mut file, br#"{"face_mesh": {"max_num_faces": 0}}"#)
        .expect("write config");
    std::env::set_var("FACEMESH_CONFIG", file.path());
    assert!(FaceMeshConfig::load().is_err());

    clear_env();
}
