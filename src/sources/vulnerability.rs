//! Top-level `securityVulnerabilities` feed.

use super::{NodeQuery, advisory_fields, vulnerability_fields};
use crate::error::Result;
use crate::graphql::QueryDocument;
use crate::models::{Connection, SecurityVulnerability};
use serde::Deserialize;
use serde_json::Value;

const VULNERABILITIES_QUERY: &str = concat!(
    "query($first: Int!, $after: String, $ecosystem: SecurityAdvisoryEcosystem) {
  securityVulnerabilities(first: $first, after: $after, ecosystem: $ecosystem, orderBy: {field: UPDATED_AT, direction: ASC}) {
    edges {
      cursor
      node {",
    vulnerability_fields!(),
    "
        advisory {",
    advisory_fields!(),
    "
        }
      }
    }
  }
}"
);

/// Query builder for the vulnerability feed.
#[derive(Debug, Clone)]
pub struct VulnerabilityQuery {
    page_size: usize,
    ecosystem: Option<String>,
}

impl VulnerabilityQuery {
    pub fn new(page_size: usize, ecosystem: Option<String>) -> Self {
        Self {
            page_size,
            ecosystem,
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct VulnerabilitiesData {
    #[serde(default)]
    security_vulnerabilities: Option<Connection<SecurityVulnerability>>,
}

impl NodeQuery for VulnerabilityQuery {
    type Node = SecurityVulnerability;

    fn page_size(&self) -> usize {
        self.page_size
    }

    fn build_query(&self, after: Option<&str>) -> QueryDocument {
        QueryDocument::new(VULNERABILITIES_QUERY)
            .variable("first", self.page_size)
            .optional_variable("after", after)
            .optional_variable("ecosystem", self.ecosystem.as_deref())
    }

    fn extract_connection(&self, data: Value) -> Result<Option<Connection<SecurityVulnerability>>> {
        let data: VulnerabilitiesData = serde_json::from_value(data)?;
        Ok(data.security_vulnerabilities)
    }
}
