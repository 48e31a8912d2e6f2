use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

/// Обертка над тестовым окружением
struct TestEnv {
    /// Временная директория, удалится сама при выходе из скоупа
    root: TempDir,
}

impl TestEnv {
    fn new() -> Self {
        Self {
            root: TempDir::new().expect("Failed to create temp dir"),
        }
    }

    /// Путь к рабочей директории теста
    fn path(&self) -> &Path {
        self.root.path()
    }

    /// Запускает tv с аргументами внутри тестовой папки
    fn tv(&self) -> Command {
        let mut cmd = Command::cargo_bin("tv_cli").expect("Binary tv_cli not found");
        cmd.current_dir(self.path());
        cmd.env_remove("TREEVER_DIR");
        cmd
    }

    /// Инициализированное окружение
    fn init() -> Self {
        let env = Self::new();
        env.tv().arg("init").assert().success();
        env
    }

    /// Запускает команду и возвращает stdout
    fn run(&self, args: &[&str]) -> String {
        let output = self.tv().args(args).assert().success().get_output().stdout.clone();
        String::from_utf8(output).expect("stdout is not utf-8")
    }

    /// Выполняет команду вида "... created: <id>" и возвращает id
    fn create(&self, args: &[&str]) -> String {
        let out = self.run(args);
        out.trim()
            .rsplit(": ")
            .next()
            .expect("no id in output")
            .to_string()
    }

    /// Проверяет существование файла/папки
    fn assert_exists(&self, path: &str) {
        assert!(self.path().join(path).exists(), "Path '{}' should exist", path);
    }
}

// --- ТЕСТОВЫЕ СЦЕНАРИИ ---

#[test]
fn test_init_creates_structure() {
    let env = TestEnv::new();

    env.tv()
        .arg("init")
        .assert()
        .success()
        .stdout(predicate::str::contains("Initialized empty store"));

    env.assert_exists(".treever");
    env.assert_exists(".treever/graph.json");
    env.assert_exists(".treever/config.toml");

    env.tv()
        .arg("init")
        .assert()
        .success()
        .stdout(predicate::str::contains("Store already exists"));
}

#[test]
fn test_commands_fail_without_store() {
    let env = TestEnv::new();
    env.tv()
        .arg("trees")
        .assert()
        .failure()
        .stderr(predicate::str::contains("Store not found"));
}

#[test]
fn test_release_workflow() {
    let env = TestEnv::init();
    let tree = env.create(&["tree", "Historical Tree"]);

    let ids: Vec<String> = (1..=5)
        .map(|i| env.create(&["node", "-t", &tree, "-d", &format!("{{\"value\":{}}}", i)]))
        .collect();
    for (from, to) in [(0, 1), (1, 2), (1, 3), (3, 4)] {
        env.create(&["edge", "-t", &tree, &ids[from], &ids[to], "-d", r#"{"relation":"child"}"#]);
    }

    env.tv()
        .args(["tag", "-t", &tree, "release-v1.0", "-m", "Release version 1.0"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Tag 'release-v1.0'"));

    // живой граф меняется после тега, снимок нет
    env.run(&["set-node", &ids[0], "-d", r#"{"value":100}"#]);

    let roots = env.run(&["roots", "release-v1.0"]);
    assert_eq!(roots, format!("{}\t{{\"value\":1}}\n", ids[0]));

    let path = env.run(&["path", "release-v1.0", &ids[0], &ids[4]]);
    let first_line = path.lines().next().unwrap();
    assert_eq!(first_line, format!("{} -> {} -> {} -> {}", ids[0], ids[1], ids[3], ids[4]));

    let depth = env.run(&["depth", "release-v1.0", "2"]);
    let mut level: Vec<&str> = depth.lines().filter_map(|l| l.split('\t').next()).collect();
    level.sort();
    let mut expected = vec![ids[2].as_str(), ids[3].as_str()];
    expected.sort();
    assert_eq!(level, expected);

    let walk = env.run(&["walk", "release-v1.0"]);
    assert_eq!(walk.lines().count(), 5);

    env.tv()
        .args(["log", "-t", &tree])
        .assert()
        .success()
        .stdout(predicate::str::contains("Tag: release-v1.0"))
        .stdout(predicate::str::contains("Description: Release version 1.0"));
}

#[test]
fn test_branch_and_extend() {
    let env = TestEnv::init();
    let tree = env.create(&["tree", "Main Tree"]);
    let main = env.create(&["node", "-t", &tree, "-d", r#"{"main":true}"#]);
    env.run(&["tag", "-t", &tree, "main-v2.0"]);

    let branch = env.create(&["branch", "-t", &tree, "main-v2.0", "--tag", "feature-x-v1"]);
    let flag = env
        .run(&["add-node", "feature-x-v1", "-d", r#"{"feature_flag":true}"#])
        .split_whitespace()
        .nth(1)
        .expect("node id")
        .to_string();
    env.run(&["add-edge", &branch, &main, &flag, "-d", r#"{"relation":"depends_on"}"#]);

    let children = env.run(&["children", "feature-x-v1", &main]);
    assert!(children.starts_with(&format!("{}\t", flag)));

    // базовая версия осталась прежней
    env.tv()
        .args(["children", "main-v2.0", &main])
        .assert()
        .success()
        .stdout(predicate::str::is_empty());

    let lineage = env.run(&["lineage", "feature-x-v1"]);
    assert!(lineage.trim().starts_with(&branch));
    assert!(lineage.contains(" <- "));
}

#[test]
fn test_duplicate_tag_is_rejected() {
    let env = TestEnv::init();
    let tree = env.create(&["tree", "t"]);
    env.run(&["tag", "-t", &tree, "stable-v1"]);

    env.tv()
        .args(["tag", "-t", &tree, "stable-v1"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("stable-v1"));

    let log = env.run(&["log", "-t", &tree]);
    assert_eq!(log.matches("Version:").count(), 1);

    let tags = env.run(&["tags", "-t", &tree]);
    assert_eq!(tags.lines().count(), 1);
    assert!(tags.starts_with("stable-v1\t"));
}

#[test]
fn test_restore_and_fetch() {
    let env = TestEnv::init();
    let tree = env.create(&["tree", "Stable Tree"]);
    let stable = env.create(&["node", "-t", &tree, "-d", r#"{"stable":true}"#]);
    env.run(&["tag", "-t", &tree, "stable-v1"]);
    env.run(&["branch", "-t", &tree, "stable-v1", "--tag", "experimental"]);
    env.run(&["add-node", "experimental", "-d", r#"{"experimental":true}"#]);

    let restored = env.run(&["restore", "-t", &tree, "stable-v1"]);
    let fetched = env.run(&["fetch", "stable-v1"]);
    assert_eq!(restored, fetched);

    let roots = env.run(&["roots", restored.trim()]);
    assert_eq!(roots.lines().count(), 1);
    assert!(roots.starts_with(&stable));

    env.tv()
        .args(["fetch", "missing"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("missing"));
}

#[test]
fn test_path_without_route() {
    let env = TestEnv::init();
    let tree = env.create(&["tree", "t"]);
    let a = env.create(&["node", "-t", &tree]);
    let b = env.create(&["node", "-t", &tree]);
    env.run(&["tag", "-t", &tree, "v1"]);

    let out = env.run(&["path", "v1", &a, &b]);
    assert_eq!(out.trim(), "No path.");
}

#[test]
fn test_invalid_json_data() {
    let env = TestEnv::init();
    let tree = env.create(&["tree", "t"]);
    env.tv()
        .args(["node", "-t", &tree, "-d", "{not json"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("not valid JSON"));
}

#[test]
fn test_strict_config_rejects_foreign_endpoints() {
    let env = TestEnv::init();
    fs::write(
        env.path().join(".treever/config.toml"),
        "strict_edge_endpoints = true\n",
    )
    .unwrap();

    let tree = env.create(&["tree", "t"]);
    let a = env.create(&["node", "-t", &tree]);
    env.run(&["tag", "-t", &tree, "v1"]);
    let b = env.create(&["node", "-t", &tree]);

    let branch = env.create(&["branch", "-t", &tree, "v1"]);
    env.tv()
        .args(["add-edge", &branch, &a, &b])
        .assert()
        .failure();
}

#[test]
fn test_custom_store_dir_and_purge() {
    let env = TestEnv::new();
    env.tv().args(["--store", "data", "init"]).assert().success();
    env.assert_exists("data/graph.json");

    let tree = env
        .tv()
        .env("TREEVER_DIR", "data")
        .args(["tree", "doomed"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let tree = String::from_utf8(tree).unwrap().trim().rsplit(": ").next().unwrap().to_string();

    env.tv()
        .args(["--store", "data", "purge", &tree])
        .assert()
        .success()
        .stdout(predicate::str::contains("purged"));

    env.tv()
        .args(["--store", "data", "trees"])
        .assert()
        .success()
        .stdout(predicate::str::contains("No trees."));
}
