//! kubectl command construction
//!
//! Container addressing is done in two explicit steps: list the pods of a
//! namespace, pick the first one whose listing line contains the selector,
//! then address that pod by name. Every argument is shell-quoted because
//! the commands run through the remote login shell.

/// `kubectl -n <ns> get pods --no-headers`
pub fn list_pods_command(namespace: &str) -> String {
    format!(
        "kubectl -n {} get pods --no-headers",
        shell_quote(namespace)
    )
}

/// Pick the pod name (first column) of the first listing line that contains
/// `selector`.
pub fn first_matching_pod(listing: &str, selector: &str) -> Option<String> {
    listing
        .lines()
        .filter(|line| line.contains(selector))
        .find_map(|line| line.split_whitespace().next())
        .map(str::to_string)
}

/// All listing lines that contain `selector`.
pub fn matching_lines<'a>(listing: &'a str, selector: &str) -> Vec<&'a str> {
    listing
        .lines()
        .filter(|line| !line.trim().is_empty() && line.contains(selector))
        .collect()
}

/// `kubectl -n <ns> cp <src> <pod>:<dest>`
pub fn copy_command(namespace: &str, source: &str, pod: &str, dest: &str) -> String {
    format!(
        "kubectl -n {} cp {} {}",
        shell_quote(namespace),
        shell_quote(source),
        shell_quote(&format!("{}:{}", pod, dest))
    )
}

/// `kubectl -n <ns> exec <pod> -- chmod -R <mode> <path>`
pub fn chmod_command(namespace: &str, pod: &str, mode: &str, path: &str) -> String {
    format!(
        "kubectl -n {} exec {} -- chmod -R {} {}",
        shell_quote(namespace),
        shell_quote(pod),
        shell_quote(mode),
        shell_quote(path)
    )
}

/// `kubectl -n <ns> exec <pod> -- sh -c <command>`
pub fn exec_command(namespace: &str, pod: &str, command: &str) -> String {
    format!(
        "kubectl -n {} exec {} -- sh -c {}",
        shell_quote(namespace),
        shell_quote(pod),
        shell_quote(command)
    )
}

/// Interactive entry line an operator can paste to get a shell in the pod.
pub fn entry_command(namespace: &str, pod: &str) -> String {
    format!(
        "kubectl -n {} exec -it {} -- sh",
        shell_quote(namespace),
        shell_quote(pod)
    )
}

/// Quote `s` for a POSIX shell. Plain words are left as they are.
pub fn shell_quote(s: &str) -> String {
    let is_plain = !s.is_empty()
        && s.chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./:=@%+,".contains(c));
    if is_plain {
        s.to_string()
    } else {
        format!("'{}'", s.replace('\'', r"'\''"))
    }
}
