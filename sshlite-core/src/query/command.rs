//! Remote command lines for the `sqlite3` CLI.

/// Flags that select the output format [`super::parser`] decodes.
///
/// `-batch` keeps the shell non-interactive and `-bail` stops at the first
/// failing statement. Insert mode with `-header` prints each row as an
/// `INSERT` statement naming its columns, with every value an SQL literal.
const SQLITE_FLAGS: &[&str] = &["-batch", "-bail", "-header", "-cmd", "'.mode insert'"];

/// Quote `arg` as a single POSIX shell word.
pub fn shell_quote(arg: &str) -> String {
    let mut quoted = String::with_capacity(arg.len() + 2);
    quoted.push('\'');
    for c in arg.chars() {
        if c == '\'' {
            quoted.push_str("'\\''");
        } else {
            quoted.push(c);
        }
    }
    quoted.push('\'');
    quoted
}

/// Command that runs `sql` against `database` and prints insert-mode rows.
///
/// The statement is passed as one argument. sqlite3 treats an argument
/// starting with `-` as an option and one starting with `.` as a dot-command,
/// so such statements get a leading space, which SQL ignores. A relative
/// database path starting with `-` is written as `./-...`.
pub fn query_command(binary: &str, database: &str, sql: &str) -> String {
    let mut parts = Vec::with_capacity(SQLITE_FLAGS.len() + 3);
    parts.push(shell_quote(binary));
    parts.extend(SQLITE_FLAGS.iter().map(|f| f.to_string()));
    if database.starts_with('-') {
        parts.push(shell_quote(&format!("./{}", database)));
    } else {
        parts.push(shell_quote(database));
    }
    parts.push(shell_quote(&guard_statement(sql)));
    parts.join(" ")
}

fn guard_statement(sql: &str) -> std::borrow::Cow<'_, str> {
    if sql.starts_with('-') || sql.starts_with('.') {
        format!(" {}", sql).into()
    } else {
        sql.into()
    }
}

/// Command that reports where `binary` lives on the remote PATH.
pub fn locate_command(binary: &str) -> String {
    format!("command -v {}", shell_quote(binary))
}

pub fn version_command(binary: &str) -> String {
    format!("{} -version", shell_quote(binary))
}
