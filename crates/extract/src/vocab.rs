//! Closed vocabularies the model must choose from.
//!
//! Every vocabulary has a total fallback: an unrecognised label maps to the
//! default variant instead of failing, both when parsing model output and
//! when deserialising stored records.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

macro_rules! closed_vocabulary {
    (
        $(#[$meta:meta])*
        $name:ident, default = $default:ident,
        { $($variant:ident => $label:literal),+ $(,)? }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $label),+
                }
            }

            /// Exact label match first, then a case-insensitive one.
            pub fn from_label(label: &str) -> Option<Self> {
                let label = label.trim();
                Self::ALL
                    .iter()
                    .copied()
                    .find(|v| v.as_str() == label)
                    .or_else(|| {
                        Self::ALL
                            .iter()
                            .copied()
                            .find(|v| v.as_str().eq_ignore_ascii_case(label))
                    })
            }

            pub fn from_label_or_default(label: &str) -> Self {
                Self::from_label(label).unwrap_or_default()
            }

            /// Labels joined for embedding in the prompt.
            pub fn label_list() -> String {
                Self::ALL
                    .iter()
                    .map(|v| v.as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            }
        }

        impl Default for $name {
            fn default() -> Self {
                $name::$default
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_str(self.as_str())
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let label = String::deserialize(deserializer)?;
                Ok(Self::from_label_or_default(&label))
            }
        }
    };
}

closed_vocabulary!(
    EntityType, default = Person,
    {
        Person => "Person",
        Location => "Location",
        Organization => "Organization",
        Item => "Item",
        Concept => "Concept",
    }
);

closed_vocabulary!(
    EntitySubtype, default = Unknown,
    {
        MainCharacter => "MainCharacter",
        SupportingCharacter => "SupportingCharacter",
        Antagonist => "Antagonist",
        Mob => "Mob",
        Weapon => "Weapon",
        Medicine => "Medicine",
        Book => "Book",
        Tool => "Tool",
        Treasure => "Treasure",
        City => "City",
        Wilderness => "Wilderness",
        Building => "Building",
        Room => "Room",
        Sect => "Sect",
        Government => "Government",
        Family => "Family",
        Unknown => "Unknown",
    }
);

closed_vocabulary!(
    HealthStatus, default = Unknown,
    {
        Healthy => "Healthy",
        Injured => "Injured",
        Critical => "Critical",
        Deceased => "Deceased",
        Poisoned => "Poisoned",
        Unknown => "Unknown",
    }
);

closed_vocabulary!(
    RelationshipType, default = RelatedTo,
    {
        Attacked => "ATTACKED",
        Protected => "PROTECTED",
        Killed => "KILLED",
        Saved => "SAVED",
        Knows => "KNOWS",
        TalkedTo => "TALKED_TO",
        RelatedTo => "RELATED_TO",
        Loves => "LOVES",
        Hates => "HATES",
        MasterOf => "MASTER_OF",
        StudentOf => "STUDENT_OF",
        MemberOf => "MEMBER_OF",
        Owns => "OWNS",
        Used => "USED",
        Lost => "LOST",
        LocatedAt => "LOCATED_AT",
        TravelledTo => "TRAVELLED_TO",
    }
);

closed_vocabulary!(
    TimeOfDay, default = Unknown,
    {
        Morning => "Morning",
        Noon => "Noon",
        Afternoon => "Afternoon",
        Evening => "Evening",
        Night => "Night",
        Unknown => "Unknown",
    }
);

impl EntitySubtype {
    pub fn is_unknown(&self) -> bool {
        *self == EntitySubtype::Unknown
    }
}

impl HealthStatus {
    pub fn is_unknown(&self) -> bool {
        *self == HealthStatus::Unknown
    }
}
