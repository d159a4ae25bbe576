use anyhow::{anyhow, bail, Context, Result};
use regex_lite::Regex;
use std::io::{ErrorKind, Read, Write};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, TcpStream, ToSocketAddrs};
use std::path::Path;
use std::time::{Duration, Instant};

use ipnetwork::IpNetwork;

/// Typed error for a missing resource, so callers can downcast on it
#[derive(Debug)]
pub struct NotFoundError {
    pub resource: String,
    pub id: String,
}

impl NotFoundError {
    pub fn new(resource: &str, id: &str) -> Self {
        Self {
            resource: resource.to_string(),
            id: id.to_string(),
        }
    }
}

impl std::fmt::Display for NotFoundError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} not found: {}", self.resource, self.id)
    }
}

impl std::error::Error for NotFoundError {}

/// Raised when a host does not accept TCP connections before the deadline
#[derive(Debug)]
pub struct TimedOut {
    pub host: String,
    pub port: u16,
    pub timeout: Duration,
}

impl std::fmt::Display for TimedOut {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "timed out waiting for {}:{} after {}s",
            self.host,
            self.port,
            self.timeout.as_secs()
        )
    }
}

impl std::error::Error for TimedOut {}

/// Keyboard-interactive prompt handler that always responds with the password
struct PasswordPrompt {
    password: String,
}

impl ssh2::KeyboardInteractivePrompt for PasswordPrompt {
    fn prompt<'a>(
        &mut self,
        _username: &str,
        _instructions: &str,
        prompts: &[ssh2::Prompt<'a>],
    ) -> Vec<String> {
        prompts.iter().map(|_| self.password.clone()).collect()
    }
}

/// Create an SSH session and authenticate with password + keyboard-interactive.
/// This is blocking, so call from a spawn_blocking context.
pub fn ssh_connect(host: &str, user: &str, pass: &str, timeout_secs: u64) -> Result<ssh2::Session> {
    let addr = format!("{}:22", host)
        .to_socket_addrs()
        .map_err(|e| anyhow!("Invalid address {}: {}", host, e))?
        .next()
        .ok_or_else(|| anyhow!("No address resolved for {}", host))?;
    let tcp = TcpStream::connect_timeout(&addr, Duration::from_secs(timeout_secs))
        .map_err(|e| anyhow!("TCP connection to {} failed: {}", addr, e))?;

    let mut session = ssh2::Session::new()
        .map_err(|e| anyhow!("Failed to create SSH session: {}", e))?;
    session.set_tcp_stream(tcp);
    session.set_timeout(timeout_secs as u32 * 1000);
    session
        .handshake()
        .map_err(|e| anyhow!("SSH handshake with {} failed: {}", host, e))?;

    // Try password auth first
    match session.userauth_password(user, pass) {
        Ok(_) if session.authenticated() => return Ok(session),
        _ => {}
    }

    // vEdge and IOS-XE images may only offer keyboard-interactive
    let mut prompter = PasswordPrompt { password: pass.to_string() };
    let _ = session.userauth_keyboard_interactive(user, &mut prompter);

    if session.authenticated() {
        Ok(session)
    } else {
        bail!("SSH authentication to {} failed: all methods exhausted", host)
    }
}

const SHELL_POLL_MS: u32 = 200;
const SHELL_BASE_TIMEOUT: Duration = Duration::from_secs(10);

/// Interactive shell on a network device, driven by prompt matching.
pub struct ShellSession {
    _session: ssh2::Session,
    channel: ssh2::Channel,
    read_timeout: Duration,
}

impl ShellSession {
    /// Open a PTY shell and wait for the first `#` prompt.
    /// `delay_factor` scales how long each command may take to return its prompt.
    pub fn open(host: &str, user: &str, pass: &str, timeout_secs: u64, delay_factor: u32) -> Result<Self> {
        let session = ssh_connect(host, user, pass, timeout_secs)?;
        let mut channel = session
            .channel_session()
            .map_err(|e| anyhow!("Failed to open channel: {}", e))?;
        channel
            .request_pty("vt100", None, Some((511, 24, 0, 0)))
            .map_err(|e| anyhow!("Failed to request pty: {}", e))?;
        channel
            .shell()
            .map_err(|e| anyhow!("Failed to start shell: {}", e))?;
        session.set_timeout(SHELL_POLL_MS);

        let mut shell = Self {
            _session: session,
            channel,
            read_timeout: SHELL_BASE_TIMEOUT * delay_factor.max(1),
        };
        shell.read_until(&prompt_regex("#")?)?;
        Ok(shell)
    }

    /// Send one command line and collect output until `expect` matches.
    pub fn send_command(&mut self, command: &str, expect: &Regex) -> Result<String> {
        self.channel
            .write_all(format!("{}\n", command).as_bytes())
            .and_then(|_| self.channel.flush())
            .map_err(|e| anyhow!("Failed to send '{}': {}", command, e))?;
        self.read_until(expect)
    }

    fn read_until(&mut self, pattern: &Regex) -> Result<String> {
        let deadline = Instant::now() + self.read_timeout;
        let mut output = String::new();
        let mut buf = [0u8; 4096];

        loop {
            match self.channel.read(&mut buf) {
                Ok(0) if self.channel.eof() => {
                    bail!("Channel closed while waiting for pattern '{}'", pattern.as_str())
                }
                Ok(0) => {}
                Ok(n) => {
                    output.push_str(&String::from_utf8_lossy(&buf[..n]));
                    if pattern.is_match(&output) {
                        return Ok(output);
                    }
                }
                Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {}
                Err(e) => bail!("Failed to read from channel: {}", e),
            }
            if Instant::now() >= deadline {
                bail!(
                    "Pattern '{}' not detected in output (timed-out): {}",
                    pattern.as_str(),
                    output.trim()
                );
            }
        }
    }

    pub fn close(mut self) {
        let _ = self.channel.send_eof();
        let _ = self.channel.close();
    }
}

/// Compile a prompt pattern, falling back to a literal match if it is not a valid regex
pub fn prompt_regex(expect: &str) -> Result<Regex> {
    Regex::new(expect)
        .or_else(|_| Regex::new(&regex_lite::escape(expect)))
        .map_err(|e| anyhow!("Invalid prompt pattern '{}': {}", expect, e))
}

/// Feed a list of command lines to a device shell, netmiko style.
/// Empty lines are skipped. A non-`#` expect pattern is answered with a bare newline.
/// Failures are logged and embedded in the returned transcript as `!#host_error:<ip>`.
pub fn ssh_send_commands(
    host: &str,
    user: &str,
    pass: &str,
    commands: &[String],
    expect: &str,
    delay_factor: u32,
    timeout_secs: u64,
) -> String {
    let mut transcript = String::new();
    tracing::debug!("Send commands to ip: {}", host);

    let result = (|| -> Result<()> {
        let expect_re = prompt_regex(expect)?;
        let prompt_re = prompt_regex("#")?;
        let mut shell = ShellSession::open(host, user, pass, timeout_secs, delay_factor)?;
        for cmd in commands {
            let cmd = cmd.trim_end_matches('\n');
            if cmd.trim().is_empty() {
                continue;
            }
            tracing::debug!("Send command: {}", cmd);
            let output = shell.send_command(cmd, &expect_re)?;
            tracing::debug!("return: {}", output);
            if !output.trim().is_empty() {
                transcript.push_str(&format!("{}\n", output));
            }
            if expect != "#" {
                shell.send_command("", &prompt_re)?;
            }
        }
        shell.close();
        Ok(())
    })();

    match result {
        Ok(()) => {
            if !transcript.trim().is_empty() {
                tracing::debug!("{}", transcript.trim());
            }
        }
        Err(e) => {
            transcript.push_str(&format!("!#host_error:{}\n{}\n", host, e));
            tracing::error!("{}", transcript);
        }
    }
    transcript
}

/// Async wrapper for ssh_send_commands - runs in a blocking thread pool
pub async fn ssh_send_commands_async(
    host: &str,
    user: &str,
    pass: &str,
    commands: Vec<String>,
    expect: &str,
    delay_factor: u32,
    timeout_secs: u64,
) -> String {
    let host = host.to_string();
    let user = user.to_string();
    let pass = pass.to_string();
    let expect = expect.to_string();

    let joined = tokio::task::spawn_blocking({
        let host = host.clone();
        move || ssh_send_commands(&host, &user, &pass, &commands, &expect, delay_factor, timeout_secs)
    })
    .await;

    match joined {
        Ok(transcript) => transcript,
        Err(e) => {
            let msg = format!("!#host_error:{}\nTask join error: {}\n", host, e);
            tracing::error!("{}", msg);
            msg
        }
    }
}

/// Copy a local file to the device home directory over SCP.
/// This is blocking, so call from a spawn_blocking context.
pub fn scp_upload(host: &str, user: &str, pass: &str, src: &Path, dst: &str, timeout_secs: u64) -> Result<()> {
    let content = std::fs::read(src).with_context(|| format!("Failed to read {}", src.display()))?;
    let session = ssh_connect(host, user, pass, timeout_secs)?;
    tracing::info!("Copy {} to {}:{}", src.display(), host, dst);

    let mut remote = session
        .scp_send(Path::new(dst), 0o644, content.len() as u64, None)
        .map_err(|e| anyhow!("SCP to {} failed: {}", host, e))?;
    remote
        .write_all(&content)
        .map_err(|e| anyhow!("SCP write to {} failed: {}", host, e))?;
    remote.send_eof().ok();
    remote.wait_eof().ok();
    remote.close().ok();
    remote.wait_close().ok();
    Ok(())
}

/// Async wrapper for scp_upload
pub async fn scp_upload_async(
    host: &str,
    user: &str,
    pass: &str,
    src: &Path,
    dst: &str,
    timeout_secs: u64,
) -> Result<()> {
    let host = host.to_string();
    let user = user.to_string();
    let pass = pass.to_string();
    let src = src.to_path_buf();
    let dst = dst.to_string();

    tokio::task::spawn_blocking(move || scp_upload(&host, &user, &pass, &src, &dst, timeout_secs))
        .await
        .map_err(|e| anyhow!("Task join error: {}", e))?
}

/// Poll a TCP port until it accepts a connection.
/// Sleeps `delay` first, then tries once per `interval` until `timeout` elapses.
/// Each attempt is bounded by `connect_timeout`. Returns a [`TimedOut`] error on expiry.
pub async fn wait_for_connection(
    host: &str,
    port: u16,
    delay: Duration,
    timeout: Duration,
    interval: Duration,
    connect_timeout: Duration,
) -> Result<()> {
    tokio::time::sleep(delay).await;
    let deadline = tokio::time::Instant::now() + timeout;
    let addr = format!("{}:{}", host, port);

    loop {
        match tokio::time::timeout(connect_timeout, tokio::net::TcpStream::connect(&addr)).await {
            Ok(Ok(_)) => {
                tracing::info!("{} is reachable", addr);
                return Ok(());
            }
            Ok(Err(e)) => tracing::debug!("Connect to {} failed: {}", addr, e),
            Err(_) => tracing::debug!("Connect to {} timed out", addr),
        }
        if tokio::time::Instant::now() + interval > deadline {
            return Err(TimedOut {
                host: host.to_string(),
                port,
                timeout,
            }
            .into());
        }
        tokio::time::sleep(interval).await;
    }
}

/// Convert a dotted netmask to a prefix length ("255.255.255.0" -> 24)
pub fn netmask_to_prefix(mask: &str) -> Option<u8> {
    let mask: Ipv4Addr = mask.trim().parse().ok()?;
    ipnetwork::ipv4_mask_to_prefix(mask).ok()
}

/// Return the n-th address of a network, counted from the network address
pub fn nth_host(net: &IpNetwork, n: u128) -> Option<IpAddr> {
    match net {
        IpNetwork::V4(v4) => {
            let base = u32::from(v4.network()) as u128;
            let addr = Ipv4Addr::from(u32::try_from(base + n).ok()?);
            v4.contains(addr).then_some(IpAddr::V4(addr))
        }
        IpNetwork::V6(v6) => {
            let addr = Ipv6Addr::from(u128::from(v6.network()).checked_add(n)?);
            v6.contains(addr).then_some(IpAddr::V6(addr))
        }
    }
}

/// First run of digits in a device name ("R12" -> 12, "SRV3a4" -> 3), 0 when there is none
pub fn name_digits(name: &str) -> u128 {
    name.chars()
        .skip_while(|c| !c.is_ascii_digit())
        .take_while(|c| c.is_ascii_digit())
        .collect::<String>()
        .parse()
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_netmask_to_prefix() {
        assert_eq!(netmask_to_prefix("255.255.255.0"), Some(24));
        assert_eq!(netmask_to_prefix("255.255.255.252"), Some(30));
        assert_eq!(netmask_to_prefix(" 255.0.0.0 "), Some(8));
        assert_eq!(netmask_to_prefix("255.0.255.0"), None);
        assert_eq!(netmask_to_prefix("bogus"), None);
    }

    #[test]
    fn test_nth_host() {
        let net: IpNetwork = "10.1.1.0/24".parse().unwrap();
        assert_eq!(nth_host(&net, 101).unwrap().to_string(), "10.1.1.101");
        assert!(nth_host(&net, 256).is_none());

        let host_bits: IpNetwork = "10.1.1.77/24".parse().unwrap();
        assert_eq!(nth_host(&host_bits, 1).unwrap().to_string(), "10.1.1.1");

        let v6: IpNetwork = "2001:db8::/64".parse().unwrap();
        assert_eq!(nth_host(&v6, 257).unwrap().to_string(), "2001:db8::101");
    }

    #[test]
    fn test_name_digits() {
        assert_eq!(name_digits("R12"), 12);
        assert_eq!(name_digits("lab_SRV3"), 3);
        assert_eq!(name_digits("R1a2"), 1);
        assert_eq!(name_digits("router"), 0);
    }

    #[test]
    fn test_prompt_regex() {
        assert!(prompt_regex("#").unwrap().is_match("vbond# "));
        assert!(prompt_regex(r"\?").unwrap().is_match("Destination filename [CA.crt]?"));
        // unbalanced bracket falls back to a literal
        assert!(prompt_regex("[").unwrap().is_match("a[b"));
    }

    #[test]
    fn test_not_found_display() {
        let err = NotFoundError::new("stack", "lab1");
        assert_eq!(err.to_string(), "stack not found: lab1");
    }

    #[tokio::test]
    async fn test_wait_for_connection_ready() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let _ = listener.accept().await;
        });

        wait_for_connection(
            "127.0.0.1",
            port,
            Duration::ZERO,
            Duration::from_secs(5),
            Duration::from_millis(50),
            Duration::from_secs(1),
        )
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_wait_for_connection_times_out() {
        // grab a free port then release it so nothing listens there
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };

        let err = wait_for_connection(
            "127.0.0.1",
            port,
            Duration::ZERO,
            Duration::from_millis(300),
            Duration::from_millis(100),
            Duration::from_millis(100),
        )
        .await
        .unwrap_err();

        let timed_out = err.downcast_ref::<TimedOut>().expect("TimedOut error");
        assert_eq!(timed_out.port, port);
    }
}
