// Supported AWS regions for the storage bucket
//
// us-east-1 is the S3 default region: CreateBucket there must not carry a
// LocationConstraint, every other region must.

use anyhow::Result;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum AwsRegion {
    #[serde(rename = "us-east-1")]
    UsEast1,
    #[serde(rename = "us-east-2")]
    UsEast2,
    #[serde(rename = "us-west-1")]
    UsWest1,
    #[default]
    #[serde(rename = "us-west-2")]
    UsWest2,
    #[serde(rename = "eu-west-1")]
    EuWest1,
    #[serde(rename = "eu-west-2")]
    EuWest2,
    #[serde(rename = "eu-west-3")]
    EuWest3,
    #[serde(rename = "eu-central-1")]
    EuCentral1,
    #[serde(rename = "eu-north-1")]
    EuNorth1,
    #[serde(rename = "ap-southeast-1")]
    ApSoutheast1,
    #[serde(rename = "ap-southeast-2")]
    ApSoutheast2,
    #[serde(rename = "ap-northeast-1")]
    ApNortheast1,
    #[serde(rename = "ap-northeast-2")]
    ApNortheast2,
    #[serde(rename = "ap-south-1")]
    ApSouth1,
    #[serde(rename = "ca-central-1")]
    CaCentral1,
    #[serde(rename = "sa-east-1")]
    SaEast1,
    #[serde(rename = "af-south-1")]
    AfSouth1,
    #[serde(rename = "me-south-1")]
    MeSouth1,
}

impl AwsRegion {
    pub const ALL: [AwsRegion; 18] = [
        AwsRegion::UsEast1,
        AwsRegion::UsEast2,
        AwsRegion::UsWest1,
        AwsRegion::UsWest2,
        AwsRegion::EuWest1,
        AwsRegion::EuWest2,
        AwsRegion::EuWest3,
        AwsRegion::EuCentral1,
        AwsRegion::EuNorth1,
        AwsRegion::ApSoutheast1,
        AwsRegion::ApSoutheast2,
        AwsRegion::ApNortheast1,
        AwsRegion::ApNortheast2,
        AwsRegion::ApSouth1,
        AwsRegion::CaCentral1,
        AwsRegion::SaEast1,
        AwsRegion::AfSouth1,
        AwsRegion::MeSouth1,
    ];

    /// The region S3 uses when a CreateBucket request has no location constraint
    pub const S3_DEFAULT: AwsRegion = AwsRegion::UsEast1;

    pub fn as_str(&self) -> &'static str {
        match self {
            AwsRegion::UsEast1 => "us-east-1",
            AwsRegion::UsEast2 => "us-east-2",
            AwsRegion::UsWest1 => "us-west-1",
            AwsRegion::UsWest2 => "us-west-2",
            AwsRegion::EuWest1 => "eu-west-1",
            AwsRegion::EuWest2 => "eu-west-2",
            AwsRegion::EuWest3 => "eu-west-3",
            AwsRegion::EuCentral1 => "eu-central-1",
            AwsRegion::EuNorth1 => "eu-north-1",
            AwsRegion::ApSoutheast1 => "ap-southeast-1",
            AwsRegion::ApSoutheast2 => "ap-southeast-2",
            AwsRegion::ApNortheast1 => "ap-northeast-1",
            AwsRegion::ApNortheast2 => "ap-northeast-2",
            AwsRegion::ApSouth1 => "ap-south-1",
            AwsRegion::CaCentral1 => "ca-central-1",
            AwsRegion::SaEast1 => "sa-east-1",
            AwsRegion::AfSouth1 => "af-south-1",
            AwsRegion::MeSouth1 => "me-south-1",
        }
    }

    /// LocationConstraint to send with CreateBucket, if any
    pub fn location_constraint(&self) -> Option<&'static str> {
        if *self == Self::S3_DEFAULT {
            None
        } else {
            Some(self.as_str())
        }
    }
}

impl std::fmt::Display for AwsRegion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for AwsRegion {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let wanted = s.trim().to_lowercase();
        AwsRegion::ALL
            .iter()
            .copied()
            .find(|region| region.as_str() == wanted)
            .ok_or_else(|| {
                let supported: Vec<&str> = AwsRegion::ALL.iter().map(|r| r.as_str()).collect();
                anyhow::anyhow!(
                    "Unsupported AWS region: {}. Supported: {}",
                    s,
                    supported.join(", ")
                )
            })
    }
}
