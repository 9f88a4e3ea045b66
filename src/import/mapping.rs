use serde::Deserialize;

pub const FIELD_COUNT: usize = 13;

/// Human labels for the 13 logical fields, in schema order. Column mapping
/// forms present these next to the headers found in the uploaded file.
pub fn required_headers() -> Vec<String> {
    [
        "Course",
        "Groups",
        "Session date",
        "From",
        "To",
        "Description",
        "Repeat on",
        "Repeat every",
        "Repeat until",
        "Students can mark",
        "Password",
        "Random password",
        "Subnet",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn unmapped() -> i32 {
    -1
}

/// What the mapping form submits: one slot per logical field, holding the
/// column index the user picked. Slots the form left out stay unmapped.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MappingForm {
    #[serde(default = "unmapped")]
    pub header0: i32,
    #[serde(default = "unmapped")]
    pub header1: i32,
    #[serde(default = "unmapped")]
    pub header2: i32,
    #[serde(default = "unmapped")]
    pub header3: i32,
    #[serde(default = "unmapped")]
    pub header4: i32,
    #[serde(default = "unmapped")]
    pub header5: i32,
    #[serde(default = "unmapped")]
    pub header6: i32,
    #[serde(default = "unmapped")]
    pub header7: i32,
    #[serde(default = "unmapped")]
    pub header8: i32,
    #[serde(default = "unmapped")]
    pub header9: i32,
    #[serde(default = "unmapped")]
    pub header10: i32,
    #[serde(default = "unmapped")]
    pub header11: i32,
    #[serde(default = "unmapped")]
    pub header12: i32,
}

/// Logical field -> column index. A negative index means "unmapped" and
/// reads as the empty string. Nothing validates that the mapped columns
/// actually carry what their header claims; a misordered mapping silently
/// produces wrong-column data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldMapping {
    pub course: i32,
    pub groups: i32,
    pub session_date: i32,
    pub from: i32,
    pub to: i32,
    pub description: i32,
    pub repeat_on: i32,
    pub repeat_every: i32,
    pub repeat_until: i32,
    pub students_can_mark: i32,
    pub password: i32,
    pub random_password: i32,
    pub subnet: i32,
}

pub fn resolve_mapping(form: Option<&MappingForm>) -> FieldMapping {
    match form {
        Some(f) => FieldMapping {
            course: f.header0,
            groups: f.header1,
            session_date: f.header2,
            from: f.header3,
            to: f.header4,
            description: f.header5,
            repeat_on: f.header6,
            repeat_every: f.header7,
            repeat_until: f.header8,
            students_can_mark: f.header9,
            password: f.header10,
            random_password: f.header11,
            subnet: f.header12,
        },
        None => FieldMapping {
            course: 0,
            groups: 1,
            session_date: 2,
            from: 3,
            to: 4,
            description: 5,
            repeat_on: 6,
            repeat_every: 7,
            repeat_until: 8,
            students_can_mark: 9,
            password: 10,
            random_password: 11,
            subnet: 12,
        },
    }
}

/// Cell at `index`, or the empty string for unmapped indexes and rows
/// shorter than the mapping expects.
pub fn column_value(cells: &[String], index: i32) -> &str {
    if index < 0 {
        return "";
    }
    cells.get(index as usize).map(|s| s.as_str()).unwrap_or("")
}
