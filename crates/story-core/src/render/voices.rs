use std::collections::{BTreeMap, HashMap};

use tracing::warn;

/// Neural voices the speech backend can be asked for.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Voice {
    Xiaoxiao,
    Yunxi,
    Xiaoyi,
    Yunjian,
    Xiaomo,
    Yunyang,
    Xiaohan,
    Yunhao,
    Aria,
    Guy,
    Jenny,
    Davis,
    Jane,
    Jason,
    Sara,
    Tony,
    /// A full voice id such as `zh-CN-XiaochenNeural`, passed through unchanged.
    Custom(String),
}

pub const DEFAULT_VOICE: Voice = Voice::Xiaoxiao;

impl Voice {
    pub fn id(&self) -> &str {
        match self {
            Self::Xiaoxiao => "zh-CN-XiaoxiaoNeural",
            Self::Yunxi => "zh-CN-YunxiNeural",
            Self::Xiaoyi => "zh-CN-XiaoyiNeural",
            Self::Yunjian => "zh-CN-YunjianNeural",
            Self::Xiaomo => "zh-CN-XiaomoNeural",
            Self::Yunyang => "zh-CN-YunyangNeural",
            Self::Xiaohan => "zh-CN-XiaohanNeural",
            Self::Yunhao => "zh-CN-YunhaoNeural",
            Self::Aria => "en-US-AriaNeural",
            Self::Guy => "en-US-GuyNeural",
            Self::Jenny => "en-US-JennyNeural",
            Self::Davis => "en-US-DavisNeural",
            Self::Jane => "en-US-JaneNeural",
            Self::Jason => "en-US-JasonNeural",
            Self::Sara => "en-US-SaraNeural",
            Self::Tony => "en-US-TonyNeural",
            Self::Custom(id) => id,
        }
    }

    /// BCP-47 locale prefix of the voice id, e.g. `zh-CN`.
    pub fn locale(&self) -> &str {
        let id = self.id();
        let mut dashes = id.match_indices('-').map(|(index, _)| index);
        match (dashes.next(), dashes.next()) {
            (Some(_), Some(end)) => &id[..end],
            _ => "zh-CN",
        }
    }

    /// Resolves a voice name, role alias or full voice id. Unknown names yield `None`.
    pub fn lookup(name: &str) -> Option<Self> {
        let trimmed = name.trim();
        if trimmed.starts_with("zh-CN-") || trimmed.starts_with("en-US-") {
            return Some(Self::Custom(trimmed.to_string()));
        }

        let voice = match trimmed.to_ascii_lowercase().as_str() {
            "xiaoxiao" | "mother" | "narrator" => Self::Xiaoxiao,
            "yunxi" => Self::Yunxi,
            "xiaoyi" | "friend" | "child" => Self::Xiaoyi,
            "yunjian" | "father" => Self::Yunjian,
            "xiaomo" => Self::Xiaomo,
            "yunyang" => Self::Yunyang,
            "xiaohan" => Self::Xiaohan,
            "yunhao" => Self::Yunhao,
            "aria" | "mother_en" => Self::Aria,
            "guy" | "father_en" => Self::Guy,
            "jenny" | "friend_en" => Self::Jenny,
            "davis" | "narrator_en" => Self::Davis,
            "jane" | "child_en" => Self::Jane,
            "jason" => Self::Jason,
            "sara" => Self::Sara,
            "tony" => Self::Tony,
            _ => return None,
        };
        Some(voice)
    }
}

/// Per-part voice assignment, resolved once from the `voices` config map.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoicePlan {
    default: Voice,
    per_part: HashMap<u32, Voice>,
}

impl Default for VoicePlan {
    fn default() -> Self {
        Self {
            default: DEFAULT_VOICE,
            per_part: HashMap::new(),
        }
    }
}

impl VoicePlan {
    /// Accepts `{"default": name, "part_<N>": name}`; unknown names fall back to the default voice.
    pub fn resolve(raw: &BTreeMap<String, String>) -> Self {
        let default = raw
            .get("default")
            .map(|name| resolve_or_fallback("default", name, &DEFAULT_VOICE))
            .unwrap_or(DEFAULT_VOICE);

        let mut per_part = HashMap::new();
        for (key, name) in raw {
            if key == "default" {
                continue;
            }
            let Some(part_number) = key
                .strip_prefix("part_")
                .and_then(|number| number.parse::<u32>().ok())
            else {
                warn!(key = %key, "ignoring unrecognised voice selection key");
                continue;
            };
            per_part.insert(part_number, resolve_or_fallback(key, name, &default));
        }

        Self { default, per_part }
    }

    pub fn default_voice(&self) -> &Voice {
        &self.default
    }

    pub fn voice_for(&self, part_number: u32) -> &Voice {
        self.per_part.get(&part_number).unwrap_or(&self.default)
    }
}

fn resolve_or_fallback(key: &str, name: &str, fallback: &Voice) -> Voice {
    Voice::lookup(name).unwrap_or_else(|| {
        warn!(
            key = %key,
            voice = %name,
            fallback = fallback.id(),
            "unknown voice name, using fallback voice"
        );
        fallback.clone()
    })
}
