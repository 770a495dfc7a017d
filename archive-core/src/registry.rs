//! 已加载频道与 VOD 的唯一持有者

use crate::channel::Channel;
use crate::vod::Vod;
use common::{ArchiveError, Result};
use std::collections::HashMap;
use tracing::{debug, info, warn};

#[derive(Debug, Default)]
pub struct Registry {
    channels: HashMap<String, Channel>,
    channel_order: Vec<String>,
    vods: HashMap<String, Vod>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_channel(&mut self, channel: Channel) -> Result<()> {
        if self.channels.contains_key(&channel.uuid) {
            return Err(ArchiveError::InvalidParameter(format!(
                "Channel {} already loaded",
                channel.uuid
            )));
        }
        debug!("Registered channel {} ({})", channel.internal_name, channel.uuid);
        self.channel_order.push(channel.uuid.clone());
        self.channels.insert(channel.uuid.clone(), channel);
        Ok(())
    }

    pub fn remove_channel(&mut self, uuid: &str) -> Option<Channel> {
        self.channel_order.retain(|u| u != uuid);
        self.channels.remove(uuid)
    }

    pub fn channel(&self, uuid: &str) -> Option<&Channel> {
        self.channels.get(uuid)
    }

    pub fn channel_mut(&mut self, uuid: &str) -> Option<&mut Channel> {
        self.channels.get_mut(uuid)
    }

    /// 按 UUID、login 或平台 ID 查找
    pub fn find_channel(&self, identifier: &str) -> Option<&Channel> {
        self.channels
            .get(identifier)
            .or_else(|| self.channels().find(|c| c.matches_identifier(identifier)))
    }

    /// 按加入顺序
    pub fn channels(&self) -> impl Iterator<Item = &Channel> {
        self.channel_order.iter().filter_map(|uuid| self.channels.get(uuid))
    }

    pub fn channel_uuids(&self) -> Vec<String> {
        self.channel_order.clone()
    }

    pub fn vod(&self, uuid: &str) -> Option<&Vod> {
        self.vods.get(uuid)
    }

    pub fn vod_mut(&mut self, uuid: &str) -> Option<&mut Vod> {
        self.vods.get_mut(uuid)
    }

    /// 同时借出 VOD（可变）与其频道（只读）
    pub fn vod_and_channel(&mut self, uuid: &str) -> Result<(&mut Vod, Option<&Channel>)> {
        let vod = self
            .vods
            .get_mut(uuid)
            .ok_or_else(|| ArchiveError::VodNotFound(uuid.to_string()))?;
        let channel = self.channels.get(&vod.channel_uuid);
        Ok((vod, channel))
    }

    pub fn vod_by_capture_id(&self, channel_uuid: &str, capture_id: &str) -> Option<&Vod> {
        self.vods
            .values()
            .find(|v| v.channel_uuid == channel_uuid && v.capture_id == capture_id)
    }

    pub fn vod_uuids(&self) -> Vec<String> {
        self.vods.keys().cloned().collect()
    }

    /// 频道的 VOD，按频道列表顺序
    pub fn vods_by_channel(&self, channel_uuid: &str) -> Vec<&Vod> {
        match self.channels.get(channel_uuid) {
            Some(channel) => channel
                .vods_list
                .iter()
                .filter_map(|uuid| self.vods.get(uuid))
                .collect(),
            None => self
                .vods
                .values()
                .filter(|v| v.channel_uuid == channel_uuid)
                .collect(),
        }
    }

    /// 登记 VOD 并挂到频道列表，UUID 或 capture_id 重复时拒绝
    pub fn add_vod(&mut self, vod: Vod) -> Result<()> {
        if vod.uuid.is_empty() {
            return Err(ArchiveError::InvalidParameter(format!(
                "VOD {} has no UUID",
                vod.basename
            )));
        }
        if self.vods.contains_key(&vod.uuid) {
            return Err(ArchiveError::DuplicateVod(vod.uuid));
        }
        if !vod.capture_id.is_empty()
            && self.vod_by_capture_id(&vod.channel_uuid, &vod.capture_id).is_some()
        {
            return Err(ArchiveError::DuplicateVod(format!("capture {}", vod.capture_id)));
        }

        let channel_uuid = vod.channel_uuid.clone();
        let uuid = vod.uuid.clone();
        self.vods.insert(uuid.clone(), vod);
        match self.channels.get_mut(&channel_uuid) {
            Some(channel) => {
                if !channel.vods_list.contains(&uuid) {
                    channel.vods_list.push(uuid);
                }
                self.sort_channel_vods(&channel_uuid);
            }
            None => warn!("VOD {} registered without a loaded channel {}", uuid, channel_uuid),
        }
        Ok(())
    }

    /// 从注册表与频道列表移除，不动磁盘
    pub fn remove_vod(&mut self, uuid: &str) -> Option<Vod> {
        let vod = self.vods.remove(uuid)?;
        if let Some(channel) = self.channels.get_mut(&vod.channel_uuid) {
            channel.vods_list.retain(|u| u != uuid);
        }
        debug!("Removed VOD {} from registry", vod.basename);
        Some(vod)
    }

    /// 移除频道的全部 VOD
    pub fn clear_vods(&mut self, channel_uuid: &str) -> Vec<Vod> {
        let uuids: Vec<String> = self
            .vods
            .values()
            .filter(|v| v.channel_uuid == channel_uuid)
            .map(|v| v.uuid.clone())
            .collect();
        uuids.iter().filter_map(|uuid| self.remove_vod(uuid)).collect()
    }

    /// 丢弃记录文件已不存在的 VOD
    pub fn clean_lingering_vods(&mut self, channel_uuid: Option<&str>) -> Vec<Vod> {
        let lingering: Vec<String> = self
            .vods
            .values()
            .filter(|v| channel_uuid.map(|c| v.channel_uuid == c).unwrap_or(true))
            .filter(|v| !v.json_path().exists())
            .map(|v| v.uuid.clone())
            .collect();

        lingering
            .iter()
            .filter_map(|uuid| {
                let vod = self.remove_vod(uuid)?;
                info!("VOD {} is gone from disk, dropped from memory", vod.basename);
                Some(vod)
            })
            .collect()
    }

    /// 频道 VOD 列表按开始时间排序
    pub fn sort_channel_vods(&mut self, channel_uuid: &str) {
        let Some(channel) = self.channels.get_mut(channel_uuid) else {
            return;
        };
        let vods = &self.vods;
        channel
            .vods_list
            .sort_by_key(|uuid| vods.get(uuid).and_then(|v| v.started_at.or(v.created_at)));
    }

    pub fn vod_count(&self) -> usize {
        self.vods.len()
    }
}
