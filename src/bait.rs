// src/bait.rs

use url::Url;

// Nomes de vídeos de exemplo que alguns hosts colocam na página como isca
pub const BAIT_FILENAMES: &[&str] = &[
    "BigBuckBunny",
    "Big_Buck_Bunny_1080_10s_5MB",
    "bbb.mp4",
];

pub const BAIT_DOMAINS: &[&str] = &[
    "test-videos.co.uk",
    "sample-videos.com",
    "commondatastorage.googleapis.com",
];

/// Listas de iscas. As listas padrão podem ser ampliadas pelo arquivo de configuração.
#[derive(Debug, Clone, PartialEq)]
pub struct BaitFilter {
    pub filenames: Vec<String>,
    pub domains: Vec<String>,
}

impl Default for BaitFilter {
    fn default() -> Self {
        Self {
            filenames: BAIT_FILENAMES.iter().map(|s| s.to_string()).collect(),
            domains: BAIT_DOMAINS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl BaitFilter {
    pub fn with_extra(mut self, filenames: &[String], domains: &[String]) -> Self {
        self.filenames.extend(filenames.iter().cloned());
        self.domains.extend(domains.iter().cloned());
        self
    }

    pub fn is_bait(&self, candidate: &str) -> bool {
        let lowered = candidate.to_lowercase();
        if self
            .filenames
            .iter()
            .any(|name| lowered.contains(&name.to_lowercase()))
        {
            return true;
        }

        let host = Url::parse(candidate)
            .ok()
            .and_then(|u| u.host_str().map(|h| h.to_lowercase()));
        match host {
            Some(host) => self
                .domains
                .iter()
                .any(|domain| host.contains(&domain.to_lowercase())),
            None => false,
        }
    }
}
