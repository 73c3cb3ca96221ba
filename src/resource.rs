//! Static tables of supported ranking dimensions: programming
//! languages and geographic locations (countries with their major
//! cities). They drive both entity tagging at store time and the
//! enumeration of the per-language and per-location pipelines.

pub struct Language {
    pub name: &'static str,
}

pub struct Location {
    pub name: &'static str,
    pub cities: &'static [&'static str],
}

pub const LANGUAGES: &[Language] = &[
    Language { name: "C" },
    Language { name: "C#" },
    Language { name: "C++" },
    Language { name: "Clojure" },
    Language { name: "CoffeeScript" },
    Language { name: "Dart" },
    Language { name: "Elixir" },
    Language { name: "Go" },
    Language { name: "Haskell" },
    Language { name: "HTML" },
    Language { name: "Java" },
    Language { name: "JavaScript" },
    Language { name: "Julia" },
    Language { name: "Kotlin" },
    Language { name: "Lua" },
    Language { name: "Objective-C" },
    Language { name: "Perl" },
    Language { name: "PHP" },
    Language { name: "Python" },
    Language { name: "R" },
    Language { name: "Ruby" },
    Language { name: "Rust" },
    Language { name: "Scala" },
    Language { name: "Shell" },
    Language { name: "Swift" },
    Language { name: "TypeScript" },
    Language { name: "Vim script" },
];

pub const LOCATIONS: &[Location] = &[
    Location {
        name: "Australia",
        cities: &["Brisbane", "Melbourne", "Sydney"],
    },
    Location {
        name: "Brazil",
        cities: &["Rio de Janeiro", "Sao Paulo"],
    },
    Location {
        name: "Canada",
        cities: &["Montreal", "Toronto", "Vancouver"],
    },
    Location {
        name: "China",
        cities: &["Beijing", "Chengdu", "Guangzhou", "Hangzhou", "Shanghai", "Shenzhen"],
    },
    Location {
        name: "France",
        cities: &["Lyon", "Paris"],
    },
    Location {
        name: "Germany",
        cities: &["Berlin", "Hamburg", "Munich"],
    },
    Location {
        name: "India",
        cities: &["Bangalore", "Chennai", "Hyderabad", "Mumbai", "New Delhi", "Pune"],
    },
    Location {
        name: "Japan",
        cities: &["Kyoto", "Osaka", "Tokyo"],
    },
    Location {
        name: "Netherlands",
        cities: &["Amsterdam", "Rotterdam"],
    },
    Location {
        name: "Singapore",
        cities: &[],
    },
    Location {
        name: "South Korea",
        cities: &["Seoul"],
    },
    Location {
        name: "Taiwan",
        cities: &["Hsinchu", "Kaohsiung", "Taichung", "Tainan", "Taipei"],
    },
    Location {
        name: "United Kingdom",
        cities: &["Cambridge", "Edinburgh", "London", "Manchester"],
    },
    Location {
        name: "United States",
        cities: &[
            "Austin",
            "Boston",
            "Chicago",
            "Los Angeles",
            "New York",
            "San Francisco",
            "Seattle",
        ],
    },
];

/// Resolve a free-form profile location into the supported names it
/// mentions: the country, and `City, Country` for each of its cities.
/// Matching is case-insensitive substring containment, which tolerates
/// inputs like "Taipei, Taiwan" or "somewhere in tokyo".
pub fn locate(raw: &str) -> Vec<String> {
    let haystack = raw.to_lowercase();
    let mut matches = Vec::new();
    for location in LOCATIONS {
        let mut country_seen = haystack.contains(&location.name.to_lowercase());
        let mut cities = Vec::new();
        for city in location.cities {
            if haystack.contains(&city.to_lowercase()) {
                cities.push(format!("{}, {}", city, location.name));
                country_seen = true;
            }
        }
        if country_seen {
            matches.push(location.name.to_string());
        }
        matches.extend(cities);
    }
    matches
}
