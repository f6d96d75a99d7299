//! Builds an index against a tiny workspace using a stand-in tagger script
//! (so the test doesn't depend on a real ctags binary being installed),
//! then confirms the resulting cache answers both a symbol lookup and a
//! literal query end to end (embeddings disabled — no embedder service is
//! running in this test).

#![cfg(unix)]

use std::os::unix::fs::PermissionsExt;
use tagcache::cache_manager::CacheManager;
use tagcache::config::Config;

fn write_fake_ctags(dir: &std::path::Path) -> std::path::PathBuf {
    let script_path = dir.join("fake-ctags.sh");
    std::fs::write(
        &script_path,
        concat!(
            "#!/bin/sh\n",
            "prev=\"\"\n",
            "outfile=\"\"\n",
            "for arg in \"$@\"; do\n",
            "  if [ \"$prev\" = \"-o\" ]; then\n",
            "    outfile=\"$arg\"\n",
            "  fi\n",
            "  prev=\"$arg\"\n",
            "done\n",
            "echo '{\"_type\":\"tag\",\"name\":\"do_thing\",\"line\":1,\"end\":3,\"kind\":\"function\",\"signature\":\"int do_thing(void)\"}' > \"$outfile\"\n"
        ),
    )
    .unwrap();
    let mut perms = std::fs::metadata(&script_path).unwrap().permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(&script_path, perms).unwrap();
    script_path
}

#[tokio::test]
async fn indexes_a_workspace_and_answers_a_search() {
    let workspace = tempfile::tempdir().unwrap();
    let src_dir = workspace.path().join("src");
    std::fs::create_dir_all(&src_dir).unwrap();
    std::fs::write(
        src_dir.join("widget.c"),
        "int do_thing(void) {\n  return 42;\n}\n",
    )
    .unwrap();

    let fake_ctags = write_fake_ctags(workspace.path());

    let mut config = Config::default();
    config.ctags_path = fake_ctags.to_string_lossy().into_owned();
    config.enable_embeddings = false;
    config.cache_dir = std::path::PathBuf::from(".cache/tagcache-test");

    let exe = std::path::PathBuf::from(env!("CARGO_BIN_EXE_tagcache"));
    let cache_manager = CacheManager::initialize(workspace.path().to_path_buf(), config, exe)
        .await
        .expect("cache manager initializes");

    let indexed = cache_manager.build_initial_index().await.expect("initial index builds");
    assert_eq!(indexed.len(), 1);

    let outputs = cache_manager
        .search(vec!["do_thing".to_string()], vec![vec!["do_thing".to_string()]])
        .await
        .expect("search runs");
    let total_matches: usize = outputs.iter().map(|o| o.matches.len()).sum();
    assert_eq!(total_matches, 1);

    cache_manager.shutdown().await;
}
