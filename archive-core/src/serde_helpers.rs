use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::time::Duration;

pub fn serialize_duration<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    (duration.as_millis() as u64).serialize(serializer)
}

pub fn deserialize_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let millis = u64::deserialize(deserializer)?;
    Ok(Duration::from_millis(millis))
}

/// 仅保留首尾都存在的暂停区间
pub mod complete_pauses {
    use common::StreamPause;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S>(pauses: &[StreamPause], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let complete: Vec<&StreamPause> = pauses.iter().filter(|p| p.is_complete()).collect();
        complete.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<StreamPause>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Vec::<StreamPause>::deserialize(deserializer)
    }
}
