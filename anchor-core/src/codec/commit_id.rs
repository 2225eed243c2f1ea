use std::{fmt::Display, io::Write, str::FromStr};

use ceramic_core::{Cid, StreamId};
use multibase::Base;
use unsigned_varint::{decode, encode};

use crate::error::{Error, Result};

/// CommitID = (type, genesisCID, commitCID), per GLOSSARY. Encodes as a
/// StreamID followed by either a zero byte (genesis commit) or the commit's
/// own CID bytes.
#[derive(PartialEq, Debug, Clone)]
pub struct CommitId {
    pub stream_id: StreamId,
    pub tip: Cid,
}

impl CommitId {
    pub fn write<W: Write>(&self, mut writer: W) -> Result<()> {
        self.stream_id
            .write(&mut writer)
            .map_err(|e| Error::InvalidRequest(format!("invalid stream id: {e}")))?;
        if self.tip == self.stream_id.cid {
            let mut buf = encode::u64_buffer();
            writer
                .write_all(encode::u64(0, &mut buf))
                .map_err(|e| Error::Other(e.into()))?;
        } else {
            self.tip
                .write_bytes(writer)
                .map_err(|e| Error::Other(e.into()))?;
        }
        Ok(())
    }

    pub fn to_vec(&self) -> Result<Vec<u8>> {
        let buf = Vec::new();
        let mut writer = std::io::BufWriter::new(buf);
        self.write(&mut writer)?;
        writer
            .into_inner()
            .map_err(|e| Error::Other(anyhow::anyhow!(e.to_string())))
    }

    pub fn new(stream_id: StreamId, tip: Cid) -> Self {
        CommitId { stream_id, tip }
    }
}

impl Display for CommitId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.to_vec() {
            Ok(bytes) => write!(f, "{}", multibase::encode(Base::Base36Lower, bytes)),
            Err(_) => Err(std::fmt::Error),
        }
    }
}

impl TryFrom<&[u8]> for CommitId {
    type Error = Error;

    fn try_from(value: &[u8]) -> Result<Self> {
        let stream_id = StreamId::try_from(value)
            .map_err(|e| Error::InvalidRequest(format!("invalid stream id bytes: {e}")))?;
        let offset = stream_id
            .to_vec()
            .map_err(|e| Error::Other(e.into()))?
            .len();
        let (tip, _) = decode::u64(&value[offset..]).map_err(|e| Error::Other(e.into()))?;
        let tip = match tip {
            0 => stream_id.cid,
            _ => Cid::try_from(&value[offset..])
                .map_err(|e| Error::InvalidRequest(format!("invalid commit cid: {e}")))?,
        };
        Ok(CommitId { stream_id, tip })
    }
}

impl FromStr for CommitId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let (_, id) =
            multibase::decode(s).map_err(|e| Error::InvalidRequest(format!("invalid commit id: {e}")))?;
        Self::try_from(id.as_slice())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_genesis_commit_id() {
        let stream_id: StreamId = "k2t6wzhkhabz46ywlu76f9w8gzjjmwn8q8lj43763x1ss840zuabxj51nlfpd9"
            .parse()
            .unwrap();
        let commit_id = CommitId::new(stream_id.clone(), stream_id.cid);
        let rendered = commit_id.to_string();
        let parsed: CommitId = rendered.parse().unwrap();
        assert_eq!(parsed, commit_id);
    }
}
