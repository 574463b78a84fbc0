//! Executable script fixtures.
//!
//! Scripts follow the subprocess contract: CLI arguments in, a single JSON
//! object on stdout, exit code 0 on success.

use std::io::Write;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use tempfile::TempDir;

/// A temporary directory of executable shell scripts
pub struct ScriptDir {
    dir: TempDir,
}

impl Default for ScriptDir {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptDir {
    /// Create an empty script directory
    pub fn new() -> Self {
        Self {
            dir: tempfile::tempdir().expect("create script dir"),
        }
    }

    /// The directory path (also where definition documents usually go)
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Write an executable `#!/bin/sh` script with the given body
    pub fn add(&self, name: &str, body: &str) -> PathBuf {
        let path = self.dir.path().join(name);
        let mut file = std::fs::File::create(&path).expect("create script");
        writeln!(file, "#!/bin/sh\n{body}").expect("write script");
        let mut perms = std::fs::metadata(&path).expect("script metadata").permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(&path, perms).expect("chmod script");
        path
    }

    /// A script that prints the given JSON verbatim and exits 0
    pub fn add_json(&self, name: &str, json: &serde_json::Value) -> PathBuf {
        let payload = json.to_string().replace('\'', "'\\''");
        self.add(name, &format!("echo '{payload}'"))
    }

    /// A script that adds 1 to its `--x` argument and prints `{"<output>": n+1}`
    pub fn add_increment(&self, name: &str, output: &str) -> PathBuf {
        self.add(
            name,
            &format!(
                r#"while [ $# -gt 0 ]; do
  case "$1" in
    --x) x="$2"; shift 2 ;;
    *) shift ;;
  esac
done
echo "{{\"{output}\": $((x + 1))}}""#
            ),
        )
    }

    /// A script that fails with the given exit code after writing to stderr
    pub fn add_failing(&self, name: &str, exit_code: i32, stderr: &str) -> PathBuf {
        self.add(name, &format!("echo '{stderr}' >&2\nexit {exit_code}"))
    }

    /// A script that sleeps for `seconds` then prints an empty object
    pub fn add_sleeper(&self, name: &str, seconds: u64) -> PathBuf {
        self.add(name, &format!("sleep {seconds}\necho '{{}}'"))
    }
}
