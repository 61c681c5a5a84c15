//! External layout program speaking JSON over stdin/stdout

use std::io::{self, Read, Write};
use std::process::{ChildStdin, Command, Stdio};
use std::thread::{self, ScopedJoinHandle};

use super::{LayoutEngine, LayoutError, LayoutInput, LayoutResult};

/// Runs an external program (e.g. an elkjs or dagre script under Node.js)
/// per layout call: [`LayoutInput`] JSON on stdin, [`LayoutResult`] JSON on stdout
#[derive(Debug, Clone)]
pub struct ProcessLayoutEngine {
    program: String,
    args: Vec<String>,
}

impl ProcessLayoutEngine {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    /// Split a command line on whitespace: `"node layout.mjs --elk"`
    pub fn from_command_line(command: &str) -> Option<Self> {
        let mut parts = command.split_whitespace();
        let engine = Self::new(parts.next()?);
        Some(parts.fold(engine, |engine, arg| engine.with_arg(arg)))
    }

    pub fn with_arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }
}

impl LayoutEngine for ProcessLayoutEngine {
    fn name(&self) -> &str {
        &self.program
    }

    fn layout(&self, input: &LayoutInput) -> Result<LayoutResult, LayoutError> {
        let input_json = serde_json::to_vec(input)?;

        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        log::debug!("spawning layout process {} {:?}", self.program, self.args);
        let mut child = command.spawn()?;
        let stdin = child.stdin.take();
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        // Output pipes are drained while stdin is written; a program may
        // write before it has read all of its input
        let (written, status, stdout, stderr) = thread::scope(|scope| {
            let stdout = scope.spawn(move || read_pipe(stdout));
            let stderr = scope.spawn(move || read_pipe(stderr));

            let written = write_input(stdin, &input_json);
            if written.is_err() {
                if let Err(e) = child.kill() {
                    log::debug!("layout process already gone: {}", e);
                }
            }
            let status = child.wait();
            (written, status, join_pipe(stdout), join_pipe(stderr))
        });

        let status = status?;
        let stdout = stdout?;
        let stderr = stderr?;
        if !status.success() {
            return Err(LayoutError::Process {
                status: status.to_string(),
                stderr: String::from_utf8_lossy(&stderr).trim().to_string(),
            });
        }
        if let Err(e) = written {
            log::error!("layout process {} did not take its input: {}", self.program, e);
            return Err(e.into());
        }

        Ok(serde_json::from_slice(&stdout)?)
    }
}

/// Closing the pipe on return signals end of input
fn write_input(stdin: Option<ChildStdin>, input: &[u8]) -> io::Result<()> {
    let mut pipe = stdin.ok_or_else(|| io::Error::new(io::ErrorKind::BrokenPipe, "layout process stdin unavailable"))?;
    pipe.write_all(input)
}

fn read_pipe(pipe: Option<impl Read>) -> io::Result<Vec<u8>> {
    let mut buffer = Vec::new();
    if let Some(mut pipe) = pipe {
        pipe.read_to_end(&mut buffer)?;
    }
    Ok(buffer)
}

fn join_pipe(handle: ScopedJoinHandle<'_, io::Result<Vec<u8>>>) -> io::Result<Vec<u8>> {
    handle
        .join()
        .unwrap_or_else(|_| Err(io::Error::new(io::ErrorKind::Other, "layout pipe reader panicked")))
}
