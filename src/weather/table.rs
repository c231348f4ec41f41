use crate::weather::enricher::WeatherParameters;
use serde_derive::Deserialize;

/// Which generation of the weather table to emit. The block layout changed
/// when the simulator introduced named cloud presets, and pre-preset
/// missions still need the parametric form.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TableSchema {
    Classic,
    #[default]
    CloudPresets,
}

/// Serialize the parameters into the mission's weather table. The block is
/// brace-balanced and carries no trailing comma: the patcher splices it over
/// the span of the old block only, leaving the text after the closing brace
/// untouched.
pub fn render(params: &WeatherParameters, schema: TableSchema) -> String {
    let preset_line = match schema {
        TableSchema::CloudPresets => format!(
            "\n            [\"preset\"] = \"{}\",",
            params.cloud_preset
        ),
        TableSchema::Classic => String::new(),
    };
    format!(
        r#"["weather"] =
    {{
        ["atmosphere_type"] = 0,
        ["clouds"] =
        {{
            ["base"] = {cloud_base},
            ["density"] = {cloud_density},{preset_line}
            ["iprecptns"] = {weather_type},
            ["thickness"] = {cloud_thickness},
        }}, -- end of ["clouds"]
        ["cyclones"] =
        {{
        }}, -- end of ["cyclones"]
        ["dust_density"] = 0,
        ["enable_dust"] = false,
        ["enable_fog"] = {fog_enabled},
        ["fog"] =
        {{
            ["thickness"] = {fog_thickness},
            ["visibility"] = {fog_visibility},
        }}, -- end of ["fog"]
        ["groundTurbulence"] = {turbulence:.2},
        ["qnh"] = {qnh:.2},
        ["season"] =
        {{
            ["temperature"] = {temperature:.2},
        }}, -- end of ["season"]
        ["type_weather"] = 2,
        ["visibility"] =
        {{
            ["distance"] = {visibility},
        }}, -- end of ["visibility"]
        ["wind"] =
        {{
            ["at2000"] =
            {{
                ["dir"] = {dir_2000},
                ["speed"] = {speed_2000:.2},
            }}, -- end of ["at2000"]
            ["at8000"] =
            {{
                ["dir"] = {dir_8000},
                ["speed"] = {speed_8000:.2},
            }}, -- end of ["at8000"]
            ["atGround"] =
            {{
                ["dir"] = {dir_ground},
                ["speed"] = {speed_ground:.2},
            }}, -- end of ["atGround"]
        }}, -- end of ["wind"]
    }}"#,
        cloud_base = params.cloud_base,
        cloud_density = params.cloud_density,
        weather_type = params.weather_type,
        cloud_thickness = params.cloud_thickness,
        fog_enabled = params.fog_enabled,
        fog_thickness = params.fog_thickness,
        fog_visibility = params.fog_visibility,
        turbulence = params.ground_turbulence,
        qnh = params.qnh_mmhg,
        temperature = params.temperature,
        visibility = params.visibility,
        dir_2000 = params.wind_2000m.direction,
        speed_2000 = params.wind_2000m.speed,
        dir_8000 = params.wind_8000m.direction,
        speed_8000 = params.wind_8000m.speed,
        dir_ground = params.wind_ground.direction,
        // The editor applies ground wind at twice the entered value.
        speed_ground = params.wind_ground.speed / 2.0,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::weather::enricher::WindVector;

    fn params() -> WeatherParameters {
        WeatherParameters {
            qnh_mmhg: 759.2,
            temperature: 21.5,
            wind_ground: WindVector {
                direction: 170,
                speed: 5.0,
            },
            wind_2000m: WindVector {
                direction: 190,
                speed: 7.5,
            },
            wind_8000m: WindVector {
                direction: 220,
                speed: 11.0,
            },
            ground_turbulence: 3.1,
            cloud_base: 610,
            cloud_thickness: 200,
            cloud_density: 9,
            cloud_preset: "Preset21".to_owned(),
            weather_type: 1,
            fog_enabled: false,
            fog_visibility: 0,
            fog_thickness: 0,
            visibility: 80000,
        }
    }

    #[test]
    fn rendered_block_is_brace_balanced() {
        for schema in [TableSchema::Classic, TableSchema::CloudPresets] {
            let block = render(&params(), schema);
            let opens = block.matches('{').count();
            let closes = block.matches('}').count();
            assert_eq!(opens, closes);
            assert!(block.starts_with(r#"["weather"] ="#));
            assert!(block.ends_with('}'));
        }
    }

    #[test]
    fn preset_key_is_schema_dependent() {
        let classic = render(&params(), TableSchema::Classic);
        assert!(!classic.contains(r#"["preset"]"#));
        let modern = render(&params(), TableSchema::CloudPresets);
        assert!(modern.contains(r#"["preset"] = "Preset21","#));
    }

    #[test]
    fn ground_wind_speed_is_halved() {
        let block = render(&params(), TableSchema::Classic);
        let at_ground = block.split(r#"["atGround"]"#).nth(1).unwrap();
        assert!(at_ground.contains(r#"["speed"] = 2.50,"#));
    }
}
