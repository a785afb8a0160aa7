// SPDX-License-Identifier: MIT

//! Fixed destination price tables used by the lookup stubs

/// Price ranges and sights for one destination
#[derive(Debug, Clone, PartialEq)]
pub struct Destination {
    /// Canonical key stored in `travel_info.destination`
    pub key: &'static str,
    pub name: &'static str,
    aliases: &'static [&'static str],
    /// Round-trip flight price range per traveler
    pub flight: (u32, u32),
    /// Hotel price range per night
    pub hotel: (u32, u32),
    /// Meals, local transport and tickets per day
    pub daily: u32,
    pub attractions: &'static [&'static str],
}

/// Extras added to every estimate
pub const OTHER_COSTS: f64 = 500.0;

/// Places the destination check refuses
pub const RESTRICTED: &[&str] = &["north korea", "afghanistan", "syria"];

/// Destinations that need a passport and visa
const INTERNATIONAL: &[&str] = &["europe", "japan", "korea", "singapore"];

/// Holidays that put a departure in peak season
pub const PEAK_HOLIDAYS: &[&str] = &[
    "spring festival",
    "chinese new year",
    "national day",
    "golden week",
    "may day",
];

pub const MONTHS: &[&str] = &[
    "january",
    "february",
    "march",
    "april",
    "may",
    "june",
    "july",
    "august",
    "september",
    "october",
    "november",
    "december",
];

static DESTINATIONS: &[Destination] = &[
    Destination {
        key: "yunnan",
        name: "Yunnan",
        aliases: &["lijiang", "dali", "kunming"],
        flight: (1200, 2500),
        hotel: (400, 1000),
        daily: 300,
        attractions: &[
            "Lijiang Old Town",
            "Jade Dragon Snow Mountain",
            "Erhai Lake",
            "Shangri-La",
            "Xishuangbanna Rainforest",
        ],
    },
    Destination {
        key: "beijing",
        name: "Beijing",
        aliases: &["peking"],
        flight: (800, 1800),
        hotel: (500, 1200),
        daily: 350,
        attractions: &[
            "Forbidden City",
            "Great Wall",
            "Tiananmen Square",
            "Summer Palace",
            "Temple of Heaven",
        ],
    },
    Destination {
        key: "shanghai",
        name: "Shanghai",
        aliases: &[],
        flight: (600, 1500),
        hotel: (600, 1500),
        daily: 400,
        attractions: &[
            "The Bund",
            "Disneyland Park",
            "Oriental Pearl Tower",
            "Nanjing Road",
            "Yu Garden",
        ],
    },
    Destination {
        key: "sanya",
        name: "Sanya",
        aliases: &["hainan"],
        flight: (1500, 3000),
        hotel: (800, 2000),
        daily: 450,
        attractions: &[
            "Yalong Bay",
            "Tianya Haijiao",
            "Nanshan Temple",
            "Wuzhizhou Island",
            "Daxiaodongtian",
        ],
    },
    Destination {
        key: "xian",
        name: "Xi'an",
        aliases: &["xi'an"],
        flight: (1000, 2000),
        hotel: (300, 800),
        daily: 250,
        attractions: &[
            "Terracotta Army",
            "Big Wild Goose Pagoda",
            "City Wall",
            "Huaqing Palace",
            "Bell and Drum Towers",
        ],
    },
    Destination {
        key: "europe",
        name: "Europe",
        aliases: &["paris", "rome", "france", "italy"],
        flight: (8000, 15000),
        hotel: (1200, 3000),
        daily: 800,
        attractions: &[],
    },
    Destination {
        key: "japan",
        name: "Japan",
        aliases: &["tokyo", "kyoto", "osaka"],
        flight: (3000, 6000),
        hotel: (800, 2000),
        daily: 600,
        attractions: &[],
    },
    Destination {
        key: "korea",
        name: "Korea",
        aliases: &["seoul", "busan"],
        flight: (2000, 4000),
        hotel: (600, 1500),
        daily: 500,
        attractions: &[],
    },
    Destination {
        key: "singapore",
        name: "Singapore",
        aliases: &[],
        flight: (3500, 6500),
        hotel: (1000, 2500),
        daily: 700,
        attractions: &[],
    },
];

static FALLBACK: Destination = Destination {
    key: "other",
    name: "Other",
    aliases: &[],
    flight: (800, 2000),
    hotel: (300, 800),
    daily: 300,
    attractions: &[],
};

const GENERIC_ATTRACTIONS: &[&str] = &["City Highlights", "Heritage Site", "Scenic Park"];

pub const DEFAULT_DESTINATION: &str = "yunnan";

impl Destination {
    fn matches(&self, text: &str) -> bool {
        text.contains(self.key) || self.aliases.iter().any(|a| text.contains(a))
    }

    pub fn is_international(&self) -> bool {
        INTERNATIONAL.contains(&self.key)
    }

    /// Whether this is a table entry rather than the fallback prices
    pub fn is_known(&self) -> bool {
        self.key != FALLBACK.key
    }

    /// Sights for itineraries, falling back to a generic list
    pub fn sights(&self) -> &'static [&'static str] {
        if self.attractions.is_empty() {
            GENERIC_ATTRACTIONS
        } else {
            self.attractions
        }
    }
}

/// Table entry for a canonical key; unknown keys get the fallback prices
pub fn lookup(key: &str) -> &'static Destination {
    DESTINATIONS
        .iter()
        .find(|d| d.key == key)
        .unwrap_or(&FALLBACK)
}

/// First destination mentioned in lowercased free text
pub fn find_in(text: &str) -> Option<&'static Destination> {
    DESTINATIONS.iter().find(|d| d.matches(text))
}

/// Middle of a price range
pub fn midpoint(range: (u32, u32)) -> f64 {
    (f64::from(range.0) + f64::from(range.1)) / 2.0
}
