use crate::Command;

#[test]
fn builder_collects_argv() {
    let cmd = Command::new("git").arg("log").args(["-n", "1"]);
    assert_eq!(cmd.argv(), ["git", "log", "-n", "1"]);
    assert_eq!(cmd.program(), Some("git"));
    assert!(cmd.environment_vars().is_none());
}

#[test]
fn from_argv_and_collect() {
    let a = Command::from_argv(["ls", "-l"]);
    let b: Command = vec!["ls".to_string(), "-l".to_string()].into_iter().collect();
    assert_eq!(a, b);
    assert_eq!(Command::from_argv(Vec::<String>::new()).program(), None);
}

#[test]
fn shell_command() {
    let cmd = Command::shell("echo $HOME");
    if cfg!(unix) {
        assert_eq!(cmd.argv(), ["sh", "-c", "echo $HOME"]);
    } else {
        assert_eq!(cmd.argv(), ["cmd.exe", "/c", "echo $HOME"]);
    }
}

#[test]
fn env_replaces_inherited_environment() {
    let cmd = Command::new("env").env("A", "1").env("B", "2");
    let vars = cmd.environment_vars().unwrap();
    assert_eq!(vars.len(), 2);
    assert_eq!(vars["A"], "1");

    let cmd = cmd.environment([("C", "3")]);
    let vars = cmd.environment_vars().unwrap();
    assert_eq!(vars.keys().collect::<Vec<_>>(), ["C"]);

    assert!(cmd.inherit_environment().environment_vars().is_none());
}

#[test]
fn cmdline_quoting() {
    let cmd = Command::new("printf").args(["%s\\n", "a b", "", "it's", "x=y/z.txt"]);
    assert_eq!(
        cmd.to_cmdline_lossy(),
        r#"printf '%s\n' 'a b' '' 'it'\''s' x=y/z.txt"#
    );
}

#[test]
fn cmdline_shows_environment() {
    let cmd = Command::new("env").env("LANG", "C").env("MSG", "hi there");
    assert_eq!(cmd.to_cmdline_lossy(), "env -i LANG=C 'MSG=hi there' env");
    assert_eq!(format!("{cmd:?}"), "Command { env -i LANG=C 'MSG=hi there' env }");
}
