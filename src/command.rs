#[cfg(unix)]
mod os {
    pub const SHELL: [&str; 2] = ["sh", "-c"];
}

#[cfg(windows)]
mod os {
    pub const SHELL: [&str; 2] = ["cmd.exe", "/c"];
}

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fmt;

use os::*;

/// A command line to run: the executable followed by its arguments.
///
/// The executable is looked up in `PATH` if it contains no path separator.
///
/// # Environment
///
/// By default the child inherits the environment of the current process. Once
/// [`env`](Self::env) or [`environment`](Self::environment) is used, the given variables
/// become the child's *entire* environment: nothing is inherited or merged. To extend the
/// current environment instead, start from `std::env::vars()`.
///
/// # Examples
///
/// ```
/// # use procpipe::Command;
/// let cmd = Command::new("git").args(["log", "-n", "1"]).env("GIT_PAGER", "cat");
/// assert_eq!(cmd.argv(), ["git", "log", "-n", "1"]);
/// ```
#[derive(Clone, Eq, PartialEq, Hash)]
#[must_use]
pub struct Command {
    argv: Vec<String>,
    env: Option<BTreeMap<String, String>>,
}

impl Command {
    /// Constructs a new `Command` that runs `program` without arguments.
    pub fn new(program: impl Into<String>) -> Command {
        Command {
            argv: vec![program.into()],
            env: None,
        }
    }

    /// Constructs a `Command` from a complete argument vector, executable first.
    ///
    /// An empty vector is accepted here but fails to launch.
    pub fn from_argv(argv: impl IntoIterator<Item = impl Into<String>>) -> Command {
        Command {
            argv: argv.into_iter().map(Into::into).collect(),
            env: None,
        }
    }

    /// Constructs a `Command` that runs `cmdline` with the system shell.
    ///
    /// On Unix-like systems this is `sh -c cmdline`, on Windows `cmd.exe /c cmdline`.
    /// Don't interpolate untrusted values into `cmdline`; pass them as arguments to
    /// [`Command::new`] instead.
    pub fn shell(cmdline: impl Into<String>) -> Command {
        Command::new(SHELL[0]).arg(SHELL[1]).arg(cmdline)
    }

    /// Appends `arg` to the argument list.
    pub fn arg(mut self, arg: impl Into<String>) -> Command {
        self.argv.push(arg.into());
        self
    }

    /// Extends the argument list with `args`.
    pub fn args(mut self, args: impl IntoIterator<Item = impl Into<String>>) -> Command {
        self.argv.extend(args.into_iter().map(Into::into));
        self
    }

    /// Sets a variable in the child's environment.
    ///
    /// The first call switches the command from inheriting the parent's environment to
    /// an explicit one that contains only the variables set this way.
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Command {
        self.env
            .get_or_insert_with(BTreeMap::new)
            .insert(key.into(), value.into());
        self
    }

    /// Replaces the child's environment with exactly `vars`.
    pub fn environment(
        mut self,
        vars: impl IntoIterator<Item = (impl Into<String>, impl Into<String>)>,
    ) -> Command {
        self.env = Some(
            vars.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        );
        self
    }

    /// Goes back to inheriting the parent's environment.
    pub fn inherit_environment(mut self) -> Command {
        self.env = None;
        self
    }

    /// The full argument vector, executable first.
    pub fn argv(&self) -> &[String] {
        &self.argv
    }

    /// The executable, or `None` for an empty argument vector.
    pub fn program(&self) -> Option<&str> {
        self.argv.first().map(String::as_str)
    }

    /// The explicit environment, or `None` if the parent's is inherited.
    pub fn environment_vars(&self) -> Option<&BTreeMap<String, String>> {
        self.env.as_ref()
    }

    fn display_escape(s: &str) -> Cow<'_, str> {
        fn nice_char(c: char) -> bool {
            match c {
                '-' | '_' | '.' | ',' | '/' | '=' => true,
                c if c.is_ascii_alphanumeric() => true,
                _ => false,
            }
        }
        if s.is_empty() || !s.chars().all(nice_char) {
            Cow::Owned(format!("'{}'", s.replace('\'', r#"'\''"#)))
        } else {
            Cow::Borrowed(s)
        }
    }

    /// Shows the command as a command line quoted in the Unix style.
    ///
    /// An explicit environment is shown as `env -i VAR=value ...` in front.
    pub fn to_cmdline_lossy(&self) -> String {
        let mut out = String::new();
        if let Some(env) = &self.env {
            out.push_str("env -i ");
            for (k, v) in env {
                out.push_str(&Command::display_escape(&format!("{k}={v}")));
                out.push(' ');
            }
        }
        let words: Vec<_> = self
            .argv
            .iter()
            .map(|arg| Command::display_escape(arg))
            .collect();
        out.push_str(&words.join(" "));
        out
    }
}

impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Command {{ {} }}", self.to_cmdline_lossy())
    }
}

impl<S: Into<String>> FromIterator<S> for Command {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Command {
        Command::from_argv(iter)
    }
}
