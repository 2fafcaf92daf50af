//! MemberAssignment wire format
//!
//! Topics are kept in the order they appear on the wire, which is the order
//! the leader's assignor produced them in.

use bytes::{Buf, BufMut};

use crate::kafka::error::{KafkaError, Result};

/// Partitions assigned to one group member
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MemberAssignment {
    pub version: i16,
    /// (topic, partitions) pairs
    pub topic_partitions: Vec<(String, Vec<i32>)>,
    /// Opaque assignor data, passed through unchanged
    pub user_data: Option<Vec<u8>>,
}

fn corrupt(message: impl Into<String>) -> KafkaError {
    KafkaError::CorruptBatch(format!("member assignment: {}", message.into()))
}

fn need(buf: &&[u8], bytes: usize, what: &str) -> Result<()> {
    if buf.remaining() < bytes {
        return Err(corrupt(format!(
            "need {} bytes for {}, have {}",
            bytes,
            what,
            buf.remaining()
        )));
    }
    Ok(())
}

impl MemberAssignment {
    pub fn new(topic_partitions: Vec<(String, Vec<i32>)>) -> Self {
        Self {
            version: 0,
            topic_partitions,
            user_data: None,
        }
    }

    /// Total number of partitions assigned
    pub fn partition_count(&self) -> usize {
        self.topic_partitions.iter().map(|(_, p)| p.len()).sum()
    }

    /// Iterate every assigned (topic, partition) pair
    pub fn iter_partitions(&self) -> impl Iterator<Item = (&str, i32)> + '_ {
        self.topic_partitions
            .iter()
            .flat_map(|(topic, partitions)| partitions.iter().map(move |p| (topic.as_str(), *p)))
    }

    /// Parse assignment bytes from a SyncGroup request
    ///
    /// An empty buffer is an empty assignment (followers send nothing).
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        if bytes.is_empty() {
            return Ok(Self::default());
        }

        let mut buf = bytes;
        need(&buf, 6, "header")?;
        let version = buf.get_i16();
        let topic_count = buf.get_i32();
        if topic_count < 0 {
            return Err(corrupt(format!("negative topic count {}", topic_count)));
        }

        let mut topic_partitions = Vec::with_capacity(topic_count.min(1024) as usize);
        for _ in 0..topic_count {
            need(&buf, 2, "topic name length")?;
            let name_len = buf.get_i16();
            if name_len < 0 {
                return Err(corrupt("null topic name"));
            }
            need(&buf, name_len as usize, "topic name")?;
            let name = String::from_utf8(buf[..name_len as usize].to_vec())
                .map_err(|e| corrupt(format!("topic name is not UTF-8: {}", e)))?;
            buf.advance(name_len as usize);

            need(&buf, 4, "partition count")?;
            let partition_count = buf.get_i32();
            let partitions = if partition_count <= 0 {
                Vec::new()
            } else {
                need(&buf, partition_count as usize * 4, "partitions")?;
                (0..partition_count).map(|_| buf.get_i32()).collect()
            };
            topic_partitions.push((name, partitions));
        }

        // Older clients omit user data entirely
        let user_data = if buf.remaining() >= 4 {
            let len = buf.get_i32();
            if len >= 0 && buf.remaining() >= len as usize {
                Some(buf[..len as usize].to_vec())
            } else {
                None
            }
        } else {
            None
        };

        Ok(Self {
            version,
            topic_partitions,
            user_data,
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(64);
        buf.put_i16(self.version);
        buf.put_i32(self.topic_partitions.len() as i32);
        for (topic, partitions) in &self.topic_partitions {
            buf.put_i16(topic.len() as i16);
            buf.put_slice(topic.as_bytes());
            buf.put_i32(partitions.len() as i32);
            for p in partitions {
                buf.put_i32(*p);
            }
        }
        match &self.user_data {
            Some(data) => {
                buf.put_i32(data.len() as i32);
                buf.put_slice(data);
            }
            None => buf.put_i32(-1),
        }
        buf
    }
}
