use std::io::Write;
use std::path::PathBuf;

use harvest_core::Locale;
use memory_harvester::cli::runtime::load_config;
use serial_test::serial;

#[tokio::test]
#[serial]
async fn yaml_file_is_loaded_over_defaults() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(
        file,
        "start_url: https://chatgpt.com/?model=auto\nharvest:\n  locale: en\nbrowser:\n  headless: true\nserve:\n  port: 9100"
    )
    .unwrap();
    let path = file.path().to_path_buf();

    let loaded = load_config(Some(&path)).await.unwrap();
    assert_eq!(loaded.path, path);
    assert_eq!(loaded.config.start_url, "https://chatgpt.com/?model=auto");
    assert_eq!(loaded.config.harvest.locale, Locale::En);
    assert!(loaded.config.browser.headless);
    assert_eq!(loaded.config.serve.port, 9100);
    assert_eq!(loaded.config.serve.host, "127.0.0.1");
}

#[tokio::test]
#[serial]
async fn missing_file_falls_back_to_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let path: PathBuf = dir.path().join("absent.yaml");

    let loaded = load_config(Some(&path)).await.unwrap();
    assert_eq!(loaded.config.serve.port, 8791);
    assert_eq!(loaded.config.harvest.locale, Locale::ZhTw);
}

#[tokio::test]
#[serial]
async fn malformed_yaml_is_an_error() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "serve:\n  port: not-a-port").unwrap();
    let path = file.path().to_path_buf();

    let err = load_config(Some(&path)).await.unwrap_err();
    assert!(format!("{err:#}").contains("parsing"));
}
