use crate::error::{Result, StoreError};
use crate::models::{Contact, MedicationSchedule, NewMedicationSchedule};

fn invalid(message: impl Into<String>) -> StoreError {
    StoreError::Validation(message.into())
}

/// Validation utilities run before anything is written
#[derive(Debug, Copy, Clone)]
pub struct InputValidator;

impl InputValidator {
    /// Validate contact name
    pub fn validate_contact_name(name: &str) -> Result<()> {
        if name.trim().is_empty() {
            return Err(invalid("Contact name cannot be empty"));
        }

        if name.chars().count() > 100 {
            return Err(invalid("Contact name too long (max 100 characters)"));
        }

        // Check for potentially dangerous characters
        if name.contains('\0') || name.contains('\r') || name.contains('\n') {
            return Err(invalid("Contact name contains invalid characters"));
        }

        Ok(())
    }

    /// Validate phone number format
    pub fn validate_phone(phone: &str) -> Result<()> {
        if phone.trim().is_empty() {
            return Err(invalid("Phone number cannot be empty"));
        }

        if phone
            .chars()
            .any(|c| !(c.is_ascii_digit() || matches!(c, '+' | '-' | '(' | ')' | ' ' | '.')))
        {
            return Err(invalid("Phone number contains invalid characters"));
        }

        let digits = phone.chars().filter(char::is_ascii_digit).count();
        if !(7..=15).contains(&digits) {
            return Err(invalid("Phone number must be between 7 and 15 digits"));
        }

        if phone.trim_start().chars().skip(1).any(|c| c == '+') {
            return Err(invalid("Phone number may only have + at the start"));
        }

        Ok(())
    }

    /// Validate email format
    pub fn validate_email(email: &str) -> Result<()> {
        if email.trim().is_empty() {
            return Err(invalid("Email cannot be empty"));
        }

        if email.len() > 254 {
            return Err(invalid("Email too long (max 254 characters)"));
        }

        let Some((local_part, domain_part)) = email.split_once('@') else {
            return Err(invalid("Email must contain @ symbol"));
        };

        if domain_part.contains('@') {
            return Err(invalid("Email must have exactly one @ symbol"));
        }

        if local_part.is_empty() || local_part.len() > 64 {
            return Err(invalid("Email local part invalid"));
        }

        if domain_part.is_empty() || !domain_part.contains('.') {
            return Err(invalid("Email domain invalid"));
        }

        Ok(())
    }

    /// Validate a contact before it is saved
    pub fn validate_contact(contact: &Contact) -> Result<()> {
        if contact.id.trim().is_empty() {
            return Err(invalid("Contact id cannot be empty"));
        }
        Self::validate_contact_name(&contact.name)?;

        if let Some(phone) = &contact.phone {
            Self::validate_phone(phone)?;
        }
        if let Some(email) = &contact.email {
            Self::validate_email(email)?;
        }

        if contact.is_emergency_contact && contact.phone.is_none() {
            return Err(invalid("Emergency contacts need a phone number"));
        }

        Ok(())
    }

    /// Validate PIN format: 4 to 6 ASCII digits
    pub fn validate_pin(pin: &str) -> Result<()> {
        if !(4..=6).contains(&pin.len()) || !pin.chars().all(|c| c.is_ascii_digit()) {
            return Err(invalid("PIN must be 4 to 6 digits"));
        }
        Ok(())
    }

    /// Validate a time of day as `HH:MM`, 00:00 to 23:59
    pub fn validate_time_of_day(time: &str) -> Result<()> {
        let parsed = time.split_once(':').and_then(|(hours, minutes)| {
            let two_digits = |part: &str| part.len() == 2 && part.bytes().all(|b| b.is_ascii_digit());
            if !two_digits(hours) || !two_digits(minutes) {
                return None;
            }
            Some((hours.parse::<u8>().ok()?, minutes.parse::<u8>().ok()?))
        });

        match parsed {
            Some((hours, minutes)) if hours < 24 && minutes < 60 => Ok(()),
            _ => Err(invalid(format!("Invalid time `{time}`, expected HH:MM"))),
        }
    }

    fn validate_schedule_fields(name: &str, dosage: &str, times: &[String]) -> Result<()> {
        if name.trim().is_empty() {
            return Err(invalid("Medication name cannot be empty"));
        }

        if name.chars().count() > 100 {
            return Err(invalid("Medication name too long (max 100 characters)"));
        }

        if dosage.trim().is_empty() {
            return Err(invalid("Dosage cannot be empty"));
        }

        if times.is_empty() {
            return Err(invalid("At least one reminder time is required"));
        }

        times.iter().try_for_each(|time| Self::validate_time_of_day(time))
    }

    /// Validate a medication schedule before it is created
    pub fn validate_new_schedule(schedule: &NewMedicationSchedule) -> Result<()> {
        if schedule.user_id.trim().is_empty() {
            return Err(invalid("User id cannot be empty"));
        }
        Self::validate_schedule_fields(&schedule.medication_name, &schedule.dosage, &schedule.times)
    }

    /// Validate an existing medication schedule before it is updated
    pub fn validate_schedule(schedule: &MedicationSchedule) -> Result<()> {
        Self::validate_schedule_fields(&schedule.medication_name, &schedule.dosage, &schedule.times)
    }

    /// Validate the privacy retention window
    pub fn validate_retention_days(days: u32) -> Result<()> {
        if !(1..=3650).contains(&days) {
            return Err(invalid("Retention must be between 1 and 3650 days"));
        }
        Ok(())
    }

    /// Validate a 1 to 5 check-in scale value
    pub fn validate_scale(field: &str, value: u8) -> Result<()> {
        if !(1..=5).contains(&value) {
            return Err(invalid(format!("{field} must be between 1 and 5")));
        }
        Ok(())
    }

    /// Validate a push token
    pub fn validate_push_token(token: &str) -> Result<()> {
        if token.trim().is_empty() {
            return Err(invalid("Push token cannot be empty"));
        }

        if token.len() > 4096 {
            return Err(invalid("Push token too long"));
        }

        Ok(())
    }

    /// Sanitize text input
    #[must_use]
    pub fn sanitize_input(text: &str) -> String {
        text.chars()
            .filter(|c| !c.is_control() || *c == '\n' || *c == '\t')
            .collect::<String>()
            .trim()
            .to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_time_of_day_bounds() {
        assert!(InputValidator::validate_time_of_day("00:00").is_ok());
        assert!(InputValidator::validate_time_of_day("23:59").is_ok());
        assert!(InputValidator::validate_time_of_day("24:00").is_err());
        assert!(InputValidator::validate_time_of_day("8:00").is_err());
        assert!(InputValidator::validate_time_of_day("08:60").is_err());
        assert!(InputValidator::validate_time_of_day("+8:00").is_err());
        assert!(InputValidator::validate_time_of_day("08:+5").is_err());
    }

    #[test]
    fn test_pin_format() {
        assert!(InputValidator::validate_pin("1234").is_ok());
        assert!(InputValidator::validate_pin("123456").is_ok());
        assert!(InputValidator::validate_pin("123").is_err());
        assert!(InputValidator::validate_pin("12a4").is_err());
    }
}
