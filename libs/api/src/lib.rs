pub mod path;
pub mod request;
pub mod response;

use serde::{Deserialize, Serialize};

/// Where extraction media comes from: the running pipeline or the segment archive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    Live,
    Historical,
}

impl std::fmt::Display for Source {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Source::Live => write!(f, "live"),
            Source::Historical => write!(f, "historical"),
        }
    }
}

impl std::str::FromStr for Source {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "live" => Ok(Source::Live),
            "historical" => Ok(Source::Historical),
            other => Err(format!("unknown source: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Processing,
    Ready,
    Failed,
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobStatus::Processing => write!(f, "processing"),
            JobStatus::Ready => write!(f, "ready"),
            JobStatus::Failed => write!(f, "failed"),
        }
    }
}

impl std::str::FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "processing" => Ok(JobStatus::Processing),
            "ready" => Ok(JobStatus::Ready),
            "failed" => Ok(JobStatus::Failed),
            other => Err(format!("unknown job status: {}", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_tags_are_lowercase() {
        assert_eq!(serde_json::to_string(&Source::Live).unwrap(), "\"live\"");
        assert_eq!(
            serde_json::from_str::<Source>("\"historical\"").unwrap(),
            Source::Historical
        );
    }

    #[test]
    fn job_status_round_trip() {
        for status in [JobStatus::Processing, JobStatus::Ready, JobStatus::Failed] {
            let text = serde_json::to_string(&status).unwrap();
            assert_eq!(serde_json::from_str::<JobStatus>(&text).unwrap(), status);
        }
    }
}
