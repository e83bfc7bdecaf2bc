use mesh_particles::prelude::*;
use serial_test::serial;

fn config_path() -> std::path::PathBuf {
    std::env::temp_dir().join("mesh_particles_config_file_test.json")
}

#[test]
#[serial]
fn config_loads_from_disk() {
    let path = config_path();
    std::fs::write(
        &path,
        r#"{
            "threshold": { "value": 0.2, "mode": "below" },
            "stitch": { "max_rounds": 64 },
            "output": { "root": 1 }
        }"#,
    )
    .unwrap();
    let cfg = ParticleConfig::from_path(&path).unwrap();
    assert_eq!(cfg.threshold, Threshold::below(0.2));
    assert_eq!(cfg.stitch.max_rounds, Some(64));
    assert_eq!(cfg.output, OutputPolicy::Root(1));
    assert_eq!(cfg.tag_base, 0x7000);
    std::fs::remove_file(&path).unwrap();
}

#[test]
#[serial]
fn invalid_config_on_disk_is_rejected() {
    let path = config_path();
    std::fs::write(&path, r#"{ "stitch": { "max_rounds": 0 } }"#).unwrap();
    let err = ParticleConfig::from_path(&path).unwrap_err();
    assert!(matches!(err, ParticleError::InvalidConfig(_)));
    assert_eq!(err.class(), ErrorClass::Configuration);
    std::fs::remove_file(&path).unwrap();
}
