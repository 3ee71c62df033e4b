//! Settings file generation and layered loading.

use std::path::PathBuf;

use quarry::Settings;
use quarry::config::CONFIG_DIR;
use tempfile::TempDir;

#[test]
fn test_generated_settings_file_loads_as_defaults() {
    figment::Jail::expect_with(|jail| {
        let path = Settings::init_config_file(false).expect("init settings");
        assert_eq!(path, PathBuf::from(CONFIG_DIR).join("settings.toml"));
        assert!(jail.directory().join(&path).exists());

        let settings = Settings::load().expect("load settings");
        let defaults = Settings::default();
        assert_eq!(settings.index.m, defaults.index.m);
        assert_eq!(settings.index.nbits, defaults.index.nbits);
        assert_eq!(settings.index.nlist, None);
        assert_eq!(settings.retrieval, defaults.retrieval);
        assert_eq!(settings.embedding.model, defaults.embedding.model);
        assert_eq!(settings.ingest, defaults.ingest);
        assert_eq!(settings.generation, defaults.generation);
        assert!(settings.validate().is_ok());

        // Detected from the .quarry directory in the jail.
        let root = settings.workspace_root.clone().expect("workspace root");
        assert_eq!(
            settings.resolve(&settings.index_path),
            root.join(".quarry/index")
        );
        Ok(())
    });
}

#[test]
fn test_init_refuses_to_overwrite_without_force() {
    figment::Jail::expect_with(|_| {
        Settings::init_config_file(false).expect("first init");
        assert!(Settings::init_config_file(false).is_err());
        assert!(Settings::init_config_file(true).is_ok());
        Ok(())
    });
}

#[test]
fn test_environment_overrides_file_values() {
    figment::Jail::expect_with(|jail| {
        std::fs::create_dir_all(jail.directory().join(CONFIG_DIR)).unwrap();
        jail.create_file(
            ".quarry/settings.toml",
            r#"
            [retrieval]
            top_k = 3
            nprobe = 2

            [index]
            nlist = 16
            nbits = 6
            "#,
        )?;
        jail.set_env("QUARRY_RETRIEVAL__NPROBE", "8");

        let settings = Settings::load().expect("load settings");
        assert_eq!(settings.retrieval.top_k, 3);
        assert_eq!(settings.retrieval.nprobe, 8);
        assert_eq!(settings.index.nlist, Some(16));
        assert_eq!(settings.index.params().nbits, 6);
        Ok(())
    });
}

#[test]
fn test_saved_settings_round_trip() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("nested").join("settings.toml");

    let mut settings = Settings::default();
    settings.retrieval.nprobe = 12;
    settings.ingest.extensions = vec!["txt".to_string(), "md".to_string()];
    settings.generation.max_new_tokens = 300;
    settings.save(&path).unwrap();

    let loaded = Settings::load_from(&path).unwrap();
    assert_eq!(loaded.retrieval.nprobe, 12);
    assert_eq!(loaded.ingest.extensions, vec!["txt", "md"]);
    assert_eq!(loaded.generation.max_new_tokens, 300);
}
