//! Job Document: the parsed representation of a chain of procedure steps,
//! and its textual on-disk format (§6.3).

use crate::capability::{parse_capability_value, CapabilityRecord, CapabilityValue};
use crate::sid::{Sid, SidParseError};
use dtrpc_error::{DtrpcError, ErrorCode};
use serde::{Deserialize, Serialize};

/// Placeholder token substituted with the previous step's result string.
pub const RESULT_PLACEHOLDER: &str = "##";

/// Status of a single step within a Job Document.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum JobStatus {
    /// Not yet claimed by any server.
    Open,
    /// Executed successfully.
    Done,
    /// Execution failed.
    Error,
}

impl JobStatus {
    fn token(self) -> Option<&'static str> {
        match self {
            JobStatus::Open => None,
            JobStatus::Done => Some("DONE"),
            JobStatus::Error => Some("ERROR"),
        }
    }

    fn parse_trailing(token: &str) -> Option<JobStatus> {
        match token {
            "DONE" => Some(JobStatus::Done),
            "ERROR" => Some(JobStatus::Error),
            _ => None,
        }
    }
}

/// A single step in a cascade.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Job {
    /// Designated host, or `any` to resolve at dispatch time.
    pub server: Sid,
    /// Procedure name.
    pub procedure: String,
    /// Ordered argument strings (may contain the `##` placeholder).
    pub arguments: Vec<String>,
    /// Execution status.
    pub status: JobStatus,
    /// Zero-based position within the document.
    pub line: usize,
    /// Per-step capability requirements, overriding the document's global
    /// filter by key.
    pub filter: CapabilityRecord,
}

impl Job {
    /// Start building a job at document position `line`.
    #[must_use]
    pub fn builder(server: Sid, procedure: impl Into<String>, line: usize) -> JobBuilder {
        JobBuilder {
            job: Job {
                server,
                procedure: procedure.into(),
                arguments: Vec::new(),
                status: JobStatus::Open,
                line,
                filter: CapabilityRecord::new(),
            },
        }
    }

    /// Arity implied by the current argument list.
    pub fn arity(&self) -> usize {
        self.arguments.len()
    }

    /// Resolve the effective capability requirement map for this step,
    /// merging the document's global filter underneath this step's local
    /// filter (local entries win by key).
    pub fn effective_filter(&self, global_filter: &CapabilityRecord) -> CapabilityRecord {
        let mut merged = global_filter.clone();
        merged.extend(self.filter.clone());
        merged
    }
}

/// Fluent builder for [`Job`].
pub struct JobBuilder {
    job: Job,
}

impl JobBuilder {
    /// Append an argument.
    #[must_use]
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.job.arguments.push(arg.into());
        self
    }

    /// Replace the full argument list.
    #[must_use]
    pub fn args(mut self, args: Vec<String>) -> Self {
        self.job.arguments = args;
        self
    }

    /// Set the step's status.
    #[must_use]
    pub fn status(mut self, status: JobStatus) -> Self {
        self.job.status = status;
        self
    }

    /// Add a local capability filter requirement.
    #[must_use]
    pub fn filter(mut self, key: impl Into<String>, value: CapabilityValue) -> Self {
        self.job.filter.insert(key.into(), value);
        self
    }

    /// Finalize the job.
    pub fn build(self) -> Job {
        self.job
    }
}

/// Header fields shared by the whole cascade.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct JobHeader {
    /// The originating client's SID.
    pub client_sid: Sid,
    /// Capability requirements applied to every step unless overridden
    /// locally.
    pub global_filter: CapabilityRecord,
}

/// A parsed job document: header plus an ordered list of steps.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct JobDocument {
    /// Document header.
    pub header: JobHeader,
    /// Ordered steps.
    pub jobs: Vec<Job>,
}

impl JobDocument {
    /// Start building a document for the given client.
    #[must_use]
    pub fn builder(client_sid: Sid) -> JobDocumentBuilder {
        JobDocumentBuilder {
            header: JobHeader {
                client_sid,
                global_filter: CapabilityRecord::new(),
            },
            jobs: Vec::new(),
        }
    }

    /// The first job in document order, if any.
    pub fn first(&self) -> Option<&Job> {
        self.jobs.first()
    }

    /// The first job with `status == Open`, along with its successor (the
    /// next job in document order), if any.
    pub fn find_open_step(&self, local_sid: &Sid) -> Option<(&Job, Option<&Job>)> {
        let idx = self
            .jobs
            .iter()
            .position(|j| j.status == JobStatus::Open && &j.server == local_sid)?;
        Some((&self.jobs[idx], self.jobs.get(idx + 1)))
    }

    /// Serialize back to the §6.3 textual format.
    pub fn to_text(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!("client_sid={}\n", self.header.client_sid));
        if !self.header.global_filter.is_empty() {
            out.push_str(&format_filter_line(&self.header.global_filter));
            out.push('\n');
        }
        for job in &self.jobs {
            out.push_str(&format_job_line(job));
            out.push('\n');
        }
        out
    }

    /// Parse the §6.3 textual job-document format.
    pub fn parse(text: &str) -> Result<Self, DtrpcError> {
        let mut lines = text.lines().filter(|l| !l.trim().is_empty() && !l.trim_start().starts_with('#'));

        let header_line = lines.next().ok_or_else(|| {
            DtrpcError::new(ErrorCode::ProtocolMalformedJobFile, "empty job document")
        })?;
        let client_sid = parse_header_line(header_line)?;

        let mut global_filter = CapabilityRecord::new();
        let mut rest: Vec<&str> = lines.collect();
        if let Some(first) = rest.first() {
            if first.trim_start().starts_with('|') {
                global_filter = parse_filter_segment(first.trim_start().trim_start_matches('|'))?;
                rest.remove(0);
            }
        }

        let mut jobs = Vec::with_capacity(rest.len());
        for (line_no, raw) in rest.into_iter().enumerate() {
            jobs.push(parse_job_line(raw, line_no)?);
        }

        Ok(JobDocument {
            header: JobHeader {
                client_sid,
                global_filter,
            },
            jobs,
        })
    }

    /// Substitute `##` in every argument of jobs at or after `from_line`
    /// with `result`, after stripping `strip_prefix` from it if present.
    pub fn substitute_placeholder(&mut self, from_line: usize, result: &str, strip_prefix: Option<&str>) {
        let cleaned = match strip_prefix {
            Some(prefix) => result.strip_prefix(prefix).unwrap_or(result),
            None => result,
        };
        for job in self.jobs.iter_mut().filter(|j| j.line > from_line) {
            for arg in &mut job.arguments {
                if arg.contains(RESULT_PLACEHOLDER) {
                    *arg = arg.replace(RESULT_PLACEHOLDER, cleaned);
                }
            }
        }
    }
}

/// Fluent builder for [`JobDocument`].
pub struct JobDocumentBuilder {
    header: JobHeader,
    jobs: Vec<Job>,
}

impl JobDocumentBuilder {
    /// Add a global capability filter requirement.
    #[must_use]
    pub fn global_filter(mut self, key: impl Into<String>, value: CapabilityValue) -> Self {
        self.header.global_filter.insert(key.into(), value);
        self
    }

    /// Append a job, assigning it the next `line` index automatically.
    #[must_use]
    pub fn job(mut self, mut job: Job) -> Self {
        job.line = self.jobs.len();
        self.jobs.push(job);
        self
    }

    /// Finalize the document.
    pub fn build(self) -> JobDocument {
        JobDocument {
            header: self.header,
            jobs: self.jobs,
        }
    }
}

fn parse_header_line(line: &str) -> Result<Sid, DtrpcError> {
    let raw = line
        .strip_prefix("client_sid=")
        .ok_or_else(|| malformed("first line must be 'client_sid=<sid>'"))?;
    Sid::parse(raw.trim()).map_err(|SidParseError::Invalid(s)| {
        malformed(&format!("invalid client_sid: {s}"))
    })
}

fn parse_filter_segment(segment: &str) -> Result<CapabilityRecord, DtrpcError> {
    let mut map = CapabilityRecord::new();
    for pair in segment.split_whitespace() {
        let (key, value) = pair
            .split_once(':')
            .ok_or_else(|| malformed(&format!("malformed filter entry: {pair}")))?;
        let parsed = parse_capability_value(key, value)
            .ok_or_else(|| malformed(&format!("malformed filter value for {key}: {value}")))?;
        map.insert(key.to_string(), parsed);
    }
    Ok(map)
}

fn parse_job_line(line: &str, line_no: usize) -> Result<Job, DtrpcError> {
    let (body, filter_segment) = match line.split_once('|') {
        Some((b, f)) => (b.trim(), Some(f.trim())),
        None => (line.trim(), None),
    };

    let mut tokens: Vec<&str> = body.split_whitespace().collect();
    if tokens.len() < 2 {
        return Err(malformed(&format!("job line {line_no} is missing server/procedure")));
    }

    let status = tokens
        .last()
        .and_then(|t| JobStatus::parse_trailing(t))
        .unwrap_or(JobStatus::Open);
    if status != JobStatus::Open {
        tokens.pop();
    }

    let server = Sid::parse(tokens[0])
        .map_err(|SidParseError::Invalid(s)| malformed(&format!("invalid server sid: {s}")))?;
    let procedure = tokens[1].to_string();
    let arguments = tokens[2..].iter().map(|s| s.to_string()).collect();

    let filter = match filter_segment {
        Some(segment) => parse_filter_segment(segment)?,
        None => CapabilityRecord::new(),
    };

    Ok(Job {
        server,
        procedure,
        arguments,
        status,
        line: line_no,
        filter,
    })
}

fn format_filter_line(filter: &CapabilityRecord) -> String {
    let pairs: Vec<String> = filter
        .iter()
        .map(|(k, v)| format!("{k}:{}", format_capability_value(v)))
        .collect();
    format!("|{}", pairs.join(" "))
}

fn format_capability_value(value: &CapabilityValue) -> String {
    match value {
        CapabilityValue::Number(n) => format!("{n}"),
        CapabilityValue::GpsCoord(x, y) => format!("{x},{y}"),
        CapabilityValue::Text(s) => s.clone(),
    }
}

fn format_job_line(job: &Job) -> String {
    let mut parts = vec![job.server.to_string(), job.procedure.clone()];
    parts.extend(job.arguments.iter().cloned());
    let mut line = parts.join(" ");
    if !job.filter.is_empty() {
        line.push(' ');
        line.push_str(&format_filter_line(&job.filter));
    }
    if let Some(token) = job.status.token() {
        line.push(' ');
        line.push_str(token);
    }
    line
}

fn malformed(msg: &str) -> DtrpcError {
    DtrpcError::new(ErrorCode::ProtocolMalformedJobFile, msg.to_string())
}
