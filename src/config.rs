use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::position::{ClassifierOptions, CleaningOptions, CrawlTarget};

pub const DEFAULT_BASE_URL: &str = "https://www.jiaoyikecha.com";

/// 対象席位
pub const DEFAULT_TARGET_SEATS: &[&str] = &["乾坤期货", "摩根大通", "国泰君安", "中信期货"];

/// 品種ページ巡回用の (表示名, シンボル)
pub const DEFAULT_VARIETIES: &[(&str, &str)] = &[
    ("螺纹钢", "RB"),
    ("热卷", "HC"),
    ("铁矿石", "I"),
    ("焦炭", "J"),
    ("焦煤", "JM"),
    ("豆粕", "M"),
    ("豆油", "Y"),
    ("棕榈油", "P"),
    ("白糖", "SR"),
    ("棉花", "CF"),
    ("PTA", "TA"),
    ("甲醇", "MA"),
    ("沪铜", "CU"),
    ("沪铝", "AL"),
    ("沪锌", "ZN"),
    ("沪镍", "NI"),
    ("原油", "SC"),
    ("燃油", "FU"),
    ("沥青", "BU"),
    ("橡胶", "RU"),
];

/// 認証済みセッションのクッキー（セッション管理側から受け取る）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionCookie {
    pub name: String,
    pub value: String,
    pub domain: String,
    #[serde(default = "default_cookie_path")]
    pub path: String,
}

fn default_cookie_path() -> String {
    "/".to_string()
}

#[derive(Debug, Clone)]
pub struct ScraperConfig {
    pub base_url: String,
    pub target_seats: Vec<String>,
    /// (表示名, シンボル)
    pub varieties: Vec<(String, String)>,
    /// 品種ページも巡回するか
    pub crawl_varieties: bool,
    /// search 応答の品種一覧を分類行ラベルの照合に使うか
    pub validate_with_metadata: bool,
    pub session_cookies: Vec<SessionCookie>,
    pub output_dir: PathBuf,
    pub headless: bool,
    pub debug: bool,
    /// ターゲット1件あたりのナビゲーションタイムアウト
    pub timeout: Duration,
    /// ナビゲーション後に応答を待つ時間
    pub settle_delay: Duration,
    /// `<table>` 出現の待機上限
    pub table_wait: Duration,
    pub classifier: ClassifierOptions,
    pub cleaning: CleaningOptions,
}

impl Default for ScraperConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            target_seats: DEFAULT_TARGET_SEATS.iter().map(|s| s.to_string()).collect(),
            varieties: DEFAULT_VARIETIES
                .iter()
                .map(|(name, symbol)| (name.to_string(), symbol.to_string()))
                .collect(),
            crawl_varieties: false,
            validate_with_metadata: false,
            session_cookies: Vec::new(),
            output_dir: PathBuf::from("./data"),
            headless: true,
            debug: false,
            timeout: Duration::from_secs(120),
            settle_delay: Duration::from_secs(5),
            table_wait: Duration::from_secs(10),
            classifier: ClassifierOptions::default(),
            cleaning: CleaningOptions::default(),
        }
    }
}

impl ScraperConfig {
    pub fn new(session_cookies: Vec<SessionCookie>) -> Self {
        Self {
            session_cookies,
            ..Default::default()
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_target_seats<I, S>(mut self, seats: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.target_seats = seats.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_crawl_varieties(mut self, crawl: bool) -> Self {
        self.crawl_varieties = crawl;
        self
    }

    pub fn with_validate_with_metadata(mut self, validate: bool) -> Self {
        self.validate_with_metadata = validate;
        self
    }

    pub fn with_output_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.output_dir = path.into();
        self
    }

    pub fn with_headless(mut self, headless: bool) -> Self {
        self.headless = headless;
        self
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_settle_delay(mut self, delay: Duration) -> Self {
        self.settle_delay = delay;
        self
    }

    pub fn with_cleaning(mut self, cleaning: CleaningOptions) -> Self {
        self.cleaning = cleaning;
        self
    }

    /// 巡回ターゲット一覧（席位 → 品種の順）
    pub fn targets(&self) -> Vec<CrawlTarget> {
        let seats = self.target_seats.iter().cloned().map(CrawlTarget::Seat);
        let varieties = self
            .varieties
            .iter()
            .filter(|_| self.crawl_varieties)
            .map(|(name, symbol)| CrawlTarget::Variety {
                name: name.clone(),
                symbol: symbol.clone(),
            });
        seats.chain(varieties).collect()
    }

    /// Chrome 実行ファイル（環境変数で指定された場合のみ）
    pub fn chrome_path() -> Option<String> {
        std::env::var("CHROME_PATH")
            .or_else(|_| std::env::var("CHROMIUM_PATH"))
            .ok()
    }
}
