use sfcore::{Region, SoundConfig};
use std::path::{Path, PathBuf};
use toml::value::{Table, Value};

static CONFIG_FILE_PATHS: &[(bool, &str)] = &[
    (true, ".config/spcplay/config.toml"),
    (true, ".config/spcplay.toml"),
    (false, "/etc/spcplay.toml"),
];

#[derive(Debug)]
pub enum ConfigLoadError {
    Io(std::io::Error),
    De(toml::de::Error),
    WrongType {
        expected: &'static str,
        got: &'static str,
    },
    UnknownField(String),
    UnknownValue {
        field: &'static str,
        value: String,
    },
    OutOfRange {
        field: &'static str,
        value: i64,
    },
}

impl From<std::io::Error> for ConfigLoadError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err)
    }
}

impl std::fmt::Display for ConfigLoadError {
    fn fmt(&self, fmt: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Self::Io(err) => write!(fmt, "unable to read config file ({err})"),
            Self::De(err) => write!(fmt, "config file parsing error: {err}"),
            Self::WrongType { expected, got } => {
                write!(fmt, "expected type `{expected}`, got `{got}`")
            }
            Self::UnknownField(field) => write!(fmt, "unknown field `{field}`"),
            Self::UnknownValue { field, value } => {
                write!(fmt, "unknown value \"{value}\" for field `{field}`")
            }
            Self::OutOfRange { field, value } => {
                write!(fmt, "value {value} out of range for field `{field}`")
            }
        }
    }
}

impl std::error::Error for ConfigLoadError {}

macro_rules! getval {
    ($val:expr, $ty:ident) => {
        match $val {
            Value::$ty(val) => Ok(val),
            val => Err(ConfigLoadError::WrongType {
                expected: stringify!($ty),
                got: val.type_str(),
            }),
        }
    };
}

fn get_int<T: TryFrom<i64>>(val: &Value, field: &'static str) -> Result<T, ConfigLoadError> {
    let value = *getval!(val, Integer)?;
    T::try_from(value).map_err(|_| ConfigLoadError::OutOfRange { field, value })
}

/// Settings of the player, as read from the config file
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub region: Region,
    pub sound: SoundConfig,
    /// Length of the rendered track
    pub seconds: f64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            region: Region::Ntsc,
            sound: SoundConfig::default(),
            seconds: 60.0,
        }
    }
}

impl Config {
    pub fn load(path: Option<PathBuf>) -> Result<Self, ConfigLoadError> {
        if let Some(path) = path.or_else(Self::seek_config_path) {
            log::info!("loading config file `{}`", path.display());
            Self::load_from_file(path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigLoadError> {
        Self::load_from_str(&std::fs::read_to_string(path)?)
    }

    pub fn load_from_str(content: &str) -> Result<Self, ConfigLoadError> {
        let main: Table = toml::de::from_str(content).map_err(ConfigLoadError::De)?;
        let mut config = Self::default();
        for (key, val) in main.iter() {
            match key.as_str() {
                "region" => {
                    let region = getval!(val, String)?;
                    config.region = match region.as_str() {
                        "ntsc" => Region::Ntsc,
                        "pal" => Region::Pal,
                        _ => {
                            return Err(ConfigLoadError::UnknownValue {
                                field: "region",
                                value: region.clone(),
                            })
                        }
                    }
                }
                "seconds" => {
                    config.seconds = match val {
                        Value::Integer(i) => *i as f64,
                        val => *getval!(val, Float)?,
                    }
                }
                "sound" => Self::load_sound(getval!(val, Table)?, &mut config.sound)?,
                _ => return Err(ConfigLoadError::UnknownField(key.clone())),
            }
        }
        Ok(config)
    }

    fn load_sound(map: &Table, sound: &mut SoundConfig) -> Result<(), ConfigLoadError> {
        for (key, val) in map.iter() {
            match key.as_str() {
                "rate" => sound.playback_rate = get_int(val, "rate")?,
                "stereo" => sound.stereo = *getval!(val, Boolean)?,
                "sixteen-bit" => sound.sixteen_bit = *getval!(val, Boolean)?,
                "interpolate" => sound.interpolate = *getval!(val, Boolean)?,
                "echo" => sound.echo = *getval!(val, Boolean)?,
                "block-frames" => sound.block_frames = get_int(val, "block-frames")?,
                "channel-mask" => sound.channel_mask = get_int(val, "channel-mask")?,
                _ => return Err(ConfigLoadError::UnknownField(format!("sound.{key}"))),
            }
        }
        if !(8000..=48000).contains(&sound.playback_rate) {
            return Err(ConfigLoadError::OutOfRange {
                field: "rate",
                value: sound.playback_rate.into(),
            });
        }
        Ok(())
    }

    pub fn seek_config_path() -> Option<PathBuf> {
        CONFIG_FILE_PATHS
            .iter()
            .filter_map(|&(with_home, path)| {
                if with_home {
                    std::env::var_os("HOME").map(|home| Path::new(&home).join(path))
                } else {
                    Some(PathBuf::from(path))
                }
            })
            .find(|path| path.is_file())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_is_default() {
        assert_eq!(Config::load_from_str("").unwrap(), Config::default());
    }

    #[test]
    fn sound_table() {
        let config = Config::load_from_str(
            "region = \"pal\"\nseconds = 12\n[sound]\nrate = 22050\nstereo = false\nchannel-mask = 3\n",
        )
        .unwrap();
        assert_eq!(config.region, Region::Pal);
        assert_eq!(config.seconds, 12.0);
        assert_eq!(config.sound.playback_rate, 22050);
        assert!(!config.sound.stereo);
        assert_eq!(config.sound.channel_mask, 3);
        assert!(config.sound.sixteen_bit);
    }

    #[test]
    fn rejects_bad_values() {
        assert!(matches!(
            Config::load_from_str("region = \"secam\""),
            Err(ConfigLoadError::UnknownValue { field: "region", .. })
        ));
        assert!(matches!(
            Config::load_from_str("[sound]\nchannel-mask = 300"),
            Err(ConfigLoadError::OutOfRange { .. })
        ));
        assert!(matches!(
            Config::load_from_str("[sound]\nrate = 96000"),
            Err(ConfigLoadError::OutOfRange { field: "rate", .. })
        ));
        assert!(matches!(
            Config::load_from_str("[sound]\necho = 1"),
            Err(ConfigLoadError::WrongType { .. })
        ));
        assert!(matches!(
            Config::load_from_str("volume = 3"),
            Err(ConfigLoadError::UnknownField(_))
        ));
    }
}
