// 提交过滤：handle 命中屏蔽片段（大小写不敏感的子串包含）即拒绝。

pub trait HandleFilter: Send + Sync {
    fn is_banned(&self, handle: &str) -> bool;
}

const DEFAULT_BANNED_PARTIALS: &[&str] = &[
    // adult
    "porn", "pornhub", "xvideos", "sex", "xxx", "nude", "nsfw", "onlyfans", "adult", "milf",
    "teen", "sexy", "hot", "babe", "cam", "strip", "naked", "escort", "sugar", "daddy", "fetish",
    // scam
    "bitcoin", "btc", "crypto", "nft", "pump", "scam", "free", "win", "giveaway", "lottery",
    "airdrop", "moon", "lambo", "hodl", "diamond", "hands", "dump", "rugpull",
    // spam
    "bot", "fake", "spam", "follow", "f4f", "like4like", "promo", "guru", "coach", "followback",
    "sub4sub", "promotion", "marketing", "advertise", "sponsor", "influencer",
    // violence
    "nazi", "hitler", "terrorist", "kill", "murder", "suicide", "bomb", "weapon", "hate",
    "violence", "fight", "war", "destroy", "explode",
    // drugs
    "drug", "weed", "cocaine", "dealer", "trap", "lean", "marijuana", "cannabis", "heroin",
    "meth", "crack", "pills", "xanax", "molly",
    // public figures
    "elonmusk", "trump", "biden", "putin", "obama", "clinton", "musk", "bezos", "gates", "zuck",
    "modi", "xi", "kim",
    // impersonation
    "official", "verified", "real", "ceo", "president", "celebrity", "check", "blue", "tick",
    "authentic", "genuine", "legit", "original", "founder",
];

#[derive(Debug, Clone)]
pub struct BannedPartials {
    partials: Vec<String>,
}

impl BannedPartials {
    /// 配置列表为空时使用内置列表。
    pub fn new(configured: &[String]) -> Self {
        let partials = configured
            .iter()
            .map(|item| item.trim().to_lowercase())
            .filter(|item| !item.is_empty())
            .collect::<Vec<_>>();
        if partials.is_empty() {
            return Self::builtin();
        }
        Self { partials }
    }

    pub fn builtin() -> Self {
        Self {
            partials: DEFAULT_BANNED_PARTIALS
                .iter()
                .map(|item| item.to_string())
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.partials.len()
    }

    pub fn is_empty(&self) -> bool {
        self.partials.is_empty()
    }
}

impl HandleFilter for BannedPartials {
    fn is_banned(&self, handle: &str) -> bool {
        let lowered = handle.to_lowercase();
        self.partials.iter().any(|bad| lowered.contains(bad.as_str()))
    }
}
